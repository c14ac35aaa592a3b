//! Publishes per-frame track state to the durable activity log and the
//! cross-process sync store.
//!
//! Log writes happen on activity transitions, plus a slower periodic flush
//! of unchanged activities. Storage failures are logged and swallowed;
//! they never stop the worker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::detection::domain::classes::is_loggable;
use crate::shared::epoch_seconds;
use crate::store::activity_log::ActivityLogStore;
use crate::store::state_sync::{SyncStore, TrackView};
use crate::tracking::track::Track;

pub struct TrackPublisher {
    camera_id: String,
    log_store: Option<Arc<ActivityLogStore>>,
    sync: Option<SyncStore>,
    periodic_interval: Duration,
    last_periodic: Instant,
}

impl TrackPublisher {
    pub fn new(
        camera_id: &str,
        log_store: Option<Arc<ActivityLogStore>>,
        sync: Option<SyncStore>,
        periodic_interval: Duration,
    ) -> Self {
        Self {
            camera_id: camera_id.to_string(),
            log_store,
            sync,
            periodic_interval,
            last_periodic: Instant::now(),
        }
    }

    /// Record transitions, run the periodic flush when due, and push the
    /// current loggable track views to the sync store.
    pub fn publish(&mut self, tracks: &mut [&mut Track]) {
        self.log_transitions(tracks);
        self.save_views(tracks);
    }

    fn log_transitions(&mut self, tracks: &mut [&mut Track]) {
        if self.log_store.is_none() {
            return;
        }

        let periodic_due = self.last_periodic.elapsed() >= self.periodic_interval;

        for track in tracks.iter_mut() {
            if should_log_change(track) {
                self.write_record(track, false);
            } else if periodic_due && is_publishable(track) {
                // Forced flush: previous_activity stays untouched so the
                // next real transition is still detected.
                self.write_record(track, true);
            }
        }

        if periodic_due {
            self.last_periodic = Instant::now();
        }
    }

    fn write_record(&self, track: &mut Track, force: bool) {
        let Some(store) = self.log_store.as_deref() else {
            return;
        };
        let (Some(class_name), Some(activity)) = (track.class_name.as_deref(), track.activity)
        else {
            return;
        };

        match store.log_activity(
            track.id,
            class_name,
            activity.as_str(),
            track.activity_conf,
            None,
            Some(&self.camera_id),
        ) {
            Ok(()) => {
                if !force {
                    track.previous_activity = Some(activity);
                }
            }
            Err(e) => log::warn!("Failed to log activity: {e}"),
        }
    }

    fn save_views(&self, tracks: &[&mut Track]) {
        let Some(sync) = self.sync.as_ref() else {
            return;
        };

        let views: Vec<TrackView> = tracks
            .iter()
            .filter(|t| {
                t.class_name
                    .as_deref()
                    .map(is_loggable)
                    .unwrap_or(false)
            })
            .map(|t| TrackView {
                track_id: t.id,
                class_name: t.class_name.clone().unwrap_or_else(|| "unknown".into()),
                activity: t
                    .activity
                    .map(|a| a.as_str().to_string())
                    .unwrap_or_else(|| "unknown".into()),
                confidence: t.activity_conf,
            })
            .collect();

        sync.save_tracks(&self.camera_id, &views, epoch_seconds());
    }
}

fn is_publishable(track: &Track) -> bool {
    track
        .class_name
        .as_deref()
        .map(is_loggable)
        .unwrap_or(false)
        && track.activity.is_some()
}

fn should_log_change(track: &Track) -> bool {
    if !is_publishable(track) {
        return false;
    }
    match track.previous_activity {
        None => true,
        Some(previous) => track.activity != Some(previous),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::classifier::Activity;
    use crate::shared::bbox::BBox;
    use crate::store::activity_log::LogQuery;
    use tempfile::TempDir;

    fn track(id: u64, class_name: &str, activity: Option<Activity>) -> Track {
        let mut track = Track::new(id, BBox::new(0.0, 0.0, 50.0, 50.0), 0, 0.9, 0.0);
        track.class_name = Some(class_name.to_string());
        track.activity = activity;
        track.activity_conf = 0.9;
        track
    }

    fn all_records(store: &ActivityLogStore) -> usize {
        store
            .get_logs(&LogQuery {
                limit: 1000,
                ..LogQuery::default()
            })
            .unwrap()
            .len()
    }

    #[test]
    fn test_transition_sequence_writes_twice() {
        // Activity sequence A A A B B → exactly two change records.
        let store = Arc::new(ActivityLogStore::in_memory().unwrap());
        let mut publisher = TrackPublisher::new(
            "cam-1",
            Some(Arc::clone(&store)),
            None,
            Duration::from_secs(3600),
        );

        let mut t = track(1, "person", Some(Activity::Standing));
        for activity in [
            Activity::Standing,
            Activity::Standing,
            Activity::Standing,
            Activity::Moving,
            Activity::Moving,
        ] {
            t.activity = Some(activity);
            publisher.publish(&mut [&mut t]);
        }

        assert_eq!(all_records(&store), 2);
        assert_eq!(t.previous_activity, Some(Activity::Moving));
    }

    #[test]
    fn test_periodic_flush_preserves_previous_activity() {
        let store = Arc::new(ActivityLogStore::in_memory().unwrap());
        // Zero interval: every publish after the first change is periodic-due.
        let mut publisher =
            TrackPublisher::new("cam-1", Some(Arc::clone(&store)), None, Duration::ZERO);

        let mut t = track(1, "person", Some(Activity::Standing));
        publisher.publish(&mut [&mut t]); // change record
        publisher.publish(&mut [&mut t]); // forced periodic record
        publisher.publish(&mut [&mut t]); // forced periodic record

        assert_eq!(all_records(&store), 3);
        // previous_activity only advanced on the change write.
        assert_eq!(t.previous_activity, Some(Activity::Standing));

        // A real transition is still detected after forced flushes.
        t.activity = Some(Activity::Moving);
        publisher.publish(&mut [&mut t]);
        assert_eq!(t.previous_activity, Some(Activity::Moving));
    }

    #[test]
    fn test_non_loggable_class_never_writes() {
        let store = Arc::new(ActivityLogStore::in_memory().unwrap());
        let mut publisher =
            TrackPublisher::new("cam-1", Some(Arc::clone(&store)), None, Duration::ZERO);

        let mut t = track(1, "truck", Some(Activity::Moving));
        publisher.publish(&mut [&mut t]);
        assert_eq!(all_records(&store), 0);
    }

    #[test]
    fn test_empty_activity_never_writes() {
        let store = Arc::new(ActivityLogStore::in_memory().unwrap());
        let mut publisher =
            TrackPublisher::new("cam-1", Some(Arc::clone(&store)), None, Duration::ZERO);

        let mut t = track(1, "person", None);
        publisher.publish(&mut [&mut t]);
        assert_eq!(all_records(&store), 0);
    }

    #[test]
    fn test_views_filtered_to_loggable_classes() {
        let dir = TempDir::new().unwrap();
        let sync = SyncStore::new(dir.path().join("sync.json"));
        let reader = SyncStore::new(dir.path().join("sync.json"));
        let mut publisher =
            TrackPublisher::new("cam-1", None, Some(sync), Duration::from_secs(3600));

        let mut person = track(1, "person", Some(Activity::Moving));
        let mut train = track(2, "train", Some(Activity::Stopped));
        let mut truck = track(3, "truck", Some(Activity::Moving));
        publisher.publish(&mut [&mut person, &mut train, &mut truck]);

        let all = reader.all_tracks();
        let views = &all["cam-1"];
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].track_id, 1);
        assert_eq!(views[0].activity, "moving");
        assert_eq!(views[1].track_id, 2);
    }

    #[test]
    fn test_camera_id_recorded() {
        let store = Arc::new(ActivityLogStore::in_memory().unwrap());
        let mut publisher = TrackPublisher::new(
            "platform-9",
            Some(Arc::clone(&store)),
            None,
            Duration::from_secs(3600),
        );

        let mut t = track(1, "person", Some(Activity::Standing));
        publisher.publish(&mut [&mut t]);

        let records = store
            .get_logs(&LogQuery {
                limit: 10,
                ..LogQuery::default()
            })
            .unwrap();
        assert_eq!(records[0].camera_id.as_deref(), Some("platform-9"));
    }
}
