//! Background detection worker: one per camera.
//!
//! The driver submits frames through a single-slot hand-off and reads back
//! consistent track snapshots; the worker runs detection, tracking,
//! classification, and PPE at its own sustainable rate, skipping frames it
//! cannot keep up with.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::activity::classifier::ActivityClassifier;
use crate::detection::domain::classes::{family_of, ClassFamily};
use crate::detection::domain::confidence_filter::ConfidenceFilter;
use crate::detection::domain::object_detector::ObjectDetector;
use crate::pipeline::frame_slot::FrameSlot;
use crate::pipeline::publisher::TrackPublisher;
use crate::ppe::high_vis::HighVisDetector;
use crate::shared::frame::Frame;
use crate::tracking::track::Track;
use crate::tracking::tracker::Tracker;

/// Bound on the worker's wait for a frame; keeps the stop flag responsive.
const QUEUE_WAIT: Duration = Duration::from_millis(10);

/// Bound on how long `stop` waits for the loop to acknowledge shutdown.
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// The per-frame processing chain, separate from the thread so it can be
/// driven deterministically in tests.
pub struct FrameProcessor {
    detector: Box<dyn ObjectDetector>,
    filter: ConfidenceFilter,
    tracker: Tracker,
    classifier: ActivityClassifier,
    ppe: Option<HighVisDetector>,
    publisher: TrackPublisher,
}

impl FrameProcessor {
    pub fn new(
        detector: Box<dyn ObjectDetector>,
        filter: ConfidenceFilter,
        tracker: Tracker,
        classifier: ActivityClassifier,
        ppe: Option<HighVisDetector>,
        publisher: TrackPublisher,
    ) -> Self {
        Self {
            detector,
            filter,
            tracker,
            classifier,
            ppe,
            publisher,
        }
    }

    /// Run one frame through detect → filter → track → classify → PPE →
    /// publish, returning the snapshot of the resulting track set.
    ///
    /// A failing detector degrades to an empty detection list for the
    /// frame; the track set ages normally.
    pub fn process(&mut self, frame: &Frame) -> Vec<Track> {
        let detections = match self.detector.predict(frame) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!("Detection failed: {e}");
                Vec::new()
            }
        };

        let detector = &self.detector;
        let filtered = self
            .filter
            .filter(detections, |id| detector.class_name(id));

        self.tracker.update(&filtered);

        for track in self.tracker.iter_mut() {
            track.class_name = detector.class_name(track.class_id).map(str::to_string);
        }

        for track in self.tracker.iter_mut() {
            self.classifier.classify(track);

            let is_person = track
                .class_name
                .as_deref()
                .map(|name| family_of(name) == ClassFamily::Person)
                .unwrap_or(false);
            track.clothing = match (&self.ppe, is_person) {
                (Some(ppe), true) => Some(ppe.detect(frame, &track.bbox)),
                _ => None,
            };
        }

        let mut refs: Vec<&mut Track> = self.tracker.iter_mut().collect();
        self.publisher.publish(&mut refs);

        self.tracker.snapshot()
    }
}

/// Long-lived worker thread bound to one camera.
pub struct DetectionWorker {
    slot: Arc<FrameSlot<Frame>>,
    tracks: Arc<Mutex<Vec<Track>>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    done_rx: Option<crossbeam_channel::Receiver<()>>,
    processor: Option<FrameProcessor>,
}

impl DetectionWorker {
    pub fn new(processor: FrameProcessor) -> Self {
        Self {
            slot: Arc::new(FrameSlot::new()),
            tracks: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            done_rx: None,
            processor: Some(processor),
        }
    }

    /// Spawn the processing thread. Calling `start` twice is a no-op.
    pub fn start(&mut self) {
        let Some(mut processor) = self.processor.take() else {
            return;
        };

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let slot = Arc::clone(&self.slot);
        let tracks = Arc::clone(&self.tracks);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        self.done_rx = Some(done_rx);

        self.handle = Some(std::thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                let Some(frame) = slot.take(QUEUE_WAIT) else {
                    continue;
                };
                let snapshot = processor.process(&frame);
                *tracks.lock().unwrap() = snapshot;
            }
            // Receiver side may already be gone if stop timed out.
            drop(done_tx);
        }));
    }

    /// Hand the worker a frame. Never blocks; if the previous frame was
    /// still unprocessed it is discarded and replaced.
    pub fn submit(&self, frame: Frame) {
        if self.slot.put(frame) {
            log::debug!("Dropped unprocessed frame");
        }
    }

    /// A copy of the most recently published track list. Always a complete,
    /// consistent set, never a partially updated one.
    pub fn snapshot(&self) -> Vec<Track> {
        self.tracks.lock().unwrap().clone()
    }

    /// Request termination and wait (bounded) for the loop to finish.
    /// On timeout the thread is left to die detached.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        let acknowledged = match self.done_rx.take() {
            // Disconnect means the loop exited and dropped its sender.
            Some(rx) => matches!(
                rx.recv_timeout(STOP_TIMEOUT),
                Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected)
            ),
            None => true,
        };

        match self.handle.take() {
            Some(handle) if acknowledged => {
                if handle.join().is_err() {
                    log::error!("Detection worker thread panicked");
                }
            }
            Some(_) => log::warn!("Detection worker did not stop in time; detaching"),
            None => {}
        }
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
        }
    }
}
