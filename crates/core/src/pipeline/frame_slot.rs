use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A single-slot most-recent-value hand-off between two threads.
///
/// `put` overwrites whatever is in the slot: a slow consumer loses old
/// values instead of queueing them, which bounds end-to-end latency to
/// roughly one processing interval. `take` clears the slot, so each value
/// is consumed at most once.
pub struct FrameSlot<T> {
    slot: Mutex<Option<T>>,
    available: Condvar,
}

impl<T> FrameSlot<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            available: Condvar::new(),
        }
    }

    /// Place a value, replacing any unconsumed one. Never blocks.
    /// Returns `true` if an unconsumed value was discarded.
    pub fn put(&self, value: T) -> bool {
        let mut slot = self.slot.lock().unwrap();
        let dropped = slot.replace(value).is_some();
        self.available.notify_one();
        dropped
    }

    /// Take the current value, waiting up to `timeout` for one to arrive.
    pub fn take(&self, timeout: Duration) -> Option<T> {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            let (guard, _) = self
                .available
                .wait_timeout_while(slot, timeout, |s| s.is_none())
                .unwrap();
            slot = guard;
        }
        slot.take()
    }
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(10);

    #[test]
    fn test_take_empty_times_out() {
        let slot: FrameSlot<u32> = FrameSlot::new();
        assert_eq!(slot.take(SHORT), None);
    }

    #[test]
    fn test_put_then_take() {
        let slot = FrameSlot::new();
        assert!(!slot.put(7));
        assert_eq!(slot.take(SHORT), Some(7));
        // The slot is cleared after a take
        assert_eq!(slot.take(SHORT), None);
    }

    #[test]
    fn test_put_overwrites_unconsumed_value() {
        let slot = FrameSlot::new();
        assert!(!slot.put(1));
        assert!(slot.put(2));
        assert!(slot.put(3));
        assert_eq!(slot.take(SHORT), Some(3));
        assert_eq!(slot.take(SHORT), None);
    }

    #[test]
    fn test_take_wakes_on_put() {
        let slot = Arc::new(FrameSlot::new());
        let producer = Arc::clone(&slot);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.put(42);
        });

        // Wait longer than the producer's delay; should wake early with
        // the value rather than timing out.
        let value = slot.take(Duration::from_secs(2));
        handle.join().unwrap();
        assert_eq!(value, Some(42));
    }

    #[test]
    fn test_producer_faster_than_consumer_sees_latest() {
        let slot = Arc::new(FrameSlot::new());
        let producer = Arc::clone(&slot);

        let handle = thread::spawn(move || {
            for i in 0..100 {
                producer.put(i);
            }
        });
        handle.join().unwrap();

        assert_eq!(slot.take(SHORT), Some(99));
    }
}
