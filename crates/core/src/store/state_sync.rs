//! Cross-process camera-state synchronization file.
//!
//! A single JSON document on disk, keyed by camera id, is the only channel
//! between camera processes and readers. Every mutation is a whole-document
//! read-modify-write through a temp file with fsync and atomic rename, so
//! readers never observe a torn document. There is no locking between
//! writers; per-camera updates are idempotent and the reader's staleness
//! predicate reconciles races.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::constants::{HEARTBEAT_TIMEOUT, STOP_GRACE};
use crate::shared::epoch_seconds;

const WRITE_RETRIES: u32 = 5;
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(50);
const READ_RETRIES: u32 = 3;
const READ_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Reduced per-track view published for queries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackView {
    pub track_id: u64,
    pub class_name: String,
    pub activity: String,
    pub confidence: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Running,
    Stopped,
}

/// One camera's record in the sync document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraState {
    pub tracks: Vec<TrackView>,
    /// Epoch seconds of the last liveness touch; 0 after a stop.
    pub heartbeat: f64,
    pub start_time: f64,
    pub status: CameraStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_time: Option<f64>,
}

impl CameraState {
    fn started(now: f64) -> Self {
        Self {
            tracks: Vec::new(),
            heartbeat: now,
            start_time: now,
            status: CameraStatus::Running,
            stop_time: None,
        }
    }

    /// The running predicate: status is running, any stop is older than the
    /// grace period, and the heartbeat is fresh.
    fn is_running(&self, now: f64, heartbeat_timeout: f64, stop_grace: f64) -> bool {
        if self.status == CameraStatus::Stopped {
            return false;
        }
        if let Some(stop_time) = self.stop_time {
            if stop_time > 0.0 && now - stop_time < stop_grace {
                return false;
            }
        }
        if self.heartbeat <= 0.0 {
            return false;
        }
        now - self.heartbeat < heartbeat_timeout
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CameraStats {
    pub person: u64,
    pub train: u64,
    pub total: u64,
}

type Document = BTreeMap<String, CameraState>;

/// Handle on the shared sync file.
///
/// Write failures are retried, then logged and swallowed; storage trouble
/// must never stop a pipeline. Read failures degrade to an empty document.
#[derive(Clone)]
pub struct SyncStore {
    path: PathBuf,
    heartbeat_timeout: f64,
    stop_grace: f64,
}

impl SyncStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            stop_grace: STOP_GRACE,
        }
    }

    /// Override the staleness windows (tests, unusual deployments).
    pub fn with_timeouts(mut self, heartbeat_timeout: f64, stop_grace: f64) -> Self {
        self.heartbeat_timeout = heartbeat_timeout;
        self.stop_grace = stop_grace;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // -- writer operations --------------------------------------------------

    /// Register a camera as freshly started, resetting any previous record.
    pub fn register_start(&self, camera_id: &str) {
        let now = epoch_seconds();
        self.update(|doc| {
            doc.insert(camera_id.to_string(), CameraState::started(now));
        });
    }

    /// Mark a camera stopped: status flips, tracks clear, the heartbeat
    /// zeroes so readers drop it immediately.
    pub fn register_stop(&self, camera_id: &str) {
        let now = epoch_seconds();
        self.update(|doc| {
            if let Some(state) = doc.get_mut(camera_id) {
                state.status = CameraStatus::Stopped;
                state.stop_time = Some(now);
                state.tracks.clear();
                state.heartbeat = 0.0;
            }
        });
    }

    /// Touch a camera's heartbeat.
    ///
    /// Deliberately does not clear `stop_time` or resurrect a stopped
    /// record: a stop holds for the grace period even if stray heartbeats
    /// keep arriving. Only `register_start` resets the record.
    pub fn heartbeat(&self, camera_id: &str) {
        let now = epoch_seconds();
        self.update(|doc| {
            doc.entry(camera_id.to_string())
                .or_insert_with(|| CameraState::started(now))
                .heartbeat = now;
        });
    }

    /// Publish the camera's current track views, doubling as a heartbeat.
    pub fn save_tracks(&self, camera_id: &str, tracks: &[TrackView], timestamp: f64) {
        self.update(|doc| {
            let state = doc
                .entry(camera_id.to_string())
                .or_insert_with(|| CameraState::started(timestamp));
            state.tracks = tracks.to_vec();
            state.heartbeat = timestamp;
        });
    }

    // -- reader operations --------------------------------------------------

    /// Ids of cameras currently considered running.
    pub fn running_ids(&self) -> Vec<String> {
        let now = epoch_seconds();
        self.read()
            .into_iter()
            .filter(|(_, state)| state.is_running(now, self.heartbeat_timeout, self.stop_grace))
            .map(|(id, _)| id)
            .collect()
    }

    /// Track views per camera, filtered to running cameras.
    pub fn all_tracks(&self) -> BTreeMap<String, Vec<TrackView>> {
        let now = epoch_seconds();
        self.read()
            .into_iter()
            .filter(|(_, state)| state.is_running(now, self.heartbeat_timeout, self.stop_grace))
            .map(|(id, state)| (id, state.tracks))
            .collect()
    }

    /// Per-class counts for one camera; zeros when it is not running.
    pub fn stats(&self, camera_id: &str) -> CameraStats {
        let now = epoch_seconds();
        let doc = self.read();
        match doc.get(camera_id) {
            Some(state) if state.is_running(now, self.heartbeat_timeout, self.stop_grace) => {
                stats_from_tracks(&state.tracks)
            }
            _ => CameraStats::default(),
        }
    }

    /// All camera ids present in the document, running or not.
    pub fn known_ids(&self) -> Vec<String> {
        self.read().into_keys().collect()
    }

    // -- document plumbing --------------------------------------------------

    fn read(&self) -> Document {
        for attempt in 0..READ_RETRIES {
            if !self.path.exists() {
                return Document::new();
            }
            match fs::read_to_string(&self.path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
            {
                Ok(doc) => return doc,
                Err(_) if attempt + 1 < READ_RETRIES => thread::sleep(READ_RETRY_DELAY),
                Err(_) => return Document::new(),
            }
        }
        Document::new()
    }

    fn update<F: FnOnce(&mut Document)>(&self, mutate: F) {
        let mut doc = self.read();
        mutate(&mut doc);
        self.write(&doc);
    }

    /// Serialize the whole document through a temp file, fsync, and rename
    /// into place so concurrent readers only ever see complete documents.
    fn write(&self, doc: &Document) {
        let text = match serde_json::to_string_pretty(doc) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to serialize sync document: {e}");
                return;
            }
        };

        for attempt in 0..WRITE_RETRIES {
            match self.try_write(&text) {
                Ok(()) => return,
                Err(e) if attempt + 1 < WRITE_RETRIES => {
                    log::debug!("Sync file write attempt {} failed: {e}", attempt + 1);
                    thread::sleep(WRITE_RETRY_DELAY);
                }
                Err(e) => {
                    log::error!("Error writing sync file after {WRITE_RETRIES} attempts: {e}");
                }
            }
        }
    }

    fn try_write(&self, text: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp_path = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            use std::io::Write;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)
    }
}

fn stats_from_tracks(tracks: &[TrackView]) -> CameraStats {
    let mut stats = CameraStats::default();
    for track in tracks {
        match track.class_name.as_str() {
            "person" => stats.person += 1,
            "train" => stats.train += 1,
            _ => {}
        }
        stats.total += 1;
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SyncStore {
        SyncStore::new(dir.path().join("sync.json"))
    }

    fn view(track_id: u64, class_name: &str) -> TrackView {
        TrackView {
            track_id,
            class_name: class_name.to_string(),
            activity: "standing".to_string(),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_register_start_then_heartbeat_is_running() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.register_start("cam-a");
        store.heartbeat("cam-a");
        assert_eq!(store.running_ids(), vec!["cam-a".to_string()]);
    }

    #[test]
    fn test_register_stop_hides_camera() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.register_start("cam-a");
        store.register_stop("cam-a");
        assert!(store.running_ids().is_empty());
    }

    #[test]
    fn test_stop_holds_through_continued_heartbeats() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.register_start("cam-a");
        store.register_stop("cam-a");

        // Stray heartbeats after a stop must not resurrect the camera
        // within the grace window.
        for _ in 0..3 {
            store.heartbeat("cam-a");
        }
        assert!(store.running_ids().is_empty());
        assert_eq!(store.stats("cam-a"), CameraStats::default());
    }

    #[test]
    fn test_restart_after_stop_is_running_again() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.register_start("cam-a");
        store.register_stop("cam-a");
        store.register_start("cam-a");
        assert_eq!(store.running_ids(), vec!["cam-a".to_string()]);
    }

    #[test]
    fn test_stale_heartbeat_excludes_camera() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        // Heartbeat two minutes in the past, against a 60 s timeout.
        store.save_tracks("cam-b", &[view(1, "person")], epoch_seconds() - 120.0);
        assert!(store.running_ids().is_empty());
        assert_eq!(store.stats("cam-b"), CameraStats::default());
    }

    #[test]
    fn test_two_cameras_one_silent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.register_start("A");
        store.save_tracks("A", &[view(1, "person")], epoch_seconds());
        store.save_tracks("B", &[view(2, "train")], epoch_seconds() - 120.0);

        assert_eq!(store.running_ids(), vec!["A".to_string()]);
        assert_eq!(store.stats("B"), CameraStats::default());
        let stats = store.stats("A");
        assert_eq!(stats.person, 1);
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn test_save_tracks_publishes_views() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.register_start("cam-a");
        store.save_tracks(
            "cam-a",
            &[view(1, "person"), view(2, "train"), view(3, "person")],
            epoch_seconds(),
        );

        let all = store.all_tracks();
        assert_eq!(all["cam-a"].len(), 3);

        let stats = store.stats("cam-a");
        assert_eq!(stats.person, 2);
        assert_eq!(stats.train, 1);
        assert_eq!(stats.total, 3);
    }

    #[test]
    fn test_register_stop_clears_tracks() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.register_start("cam-a");
        store.save_tracks("cam-a", &[view(1, "person")], epoch_seconds());
        store.register_stop("cam-a");

        // Even reading the raw document, the tracks are gone.
        let text = fs::read_to_string(store.path()).unwrap();
        let doc: Document = serde_json::from_str(&text).unwrap();
        assert!(doc["cam-a"].tracks.is_empty());
        assert_eq!(doc["cam-a"].heartbeat, 0.0);
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.running_ids().is_empty());
        assert!(store.all_tracks().is_empty());
        assert_eq!(store.stats("anything"), CameraStats::default());
    }

    #[test]
    fn test_corrupted_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(store.path(), b"{ not json at all").unwrap();
        assert!(store.running_ids().is_empty());
        assert!(store.all_tracks().is_empty());
    }

    #[test]
    fn test_write_survives_corrupted_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(store.path(), b"garbage").unwrap();
        store.register_start("cam-a");
        assert_eq!(store.running_ids(), vec!["cam-a".to_string()]);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.register_start("cam-a");
        assert!(!store.path().with_extension("tmp").exists());
    }

    #[test]
    fn test_unknown_class_counts_only_toward_total() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.register_start("cam-a");
        store.save_tracks("cam-a", &[view(1, "truck")], epoch_seconds());
        let stats = store.stats("cam-a");
        assert_eq!(stats.person, 0);
        assert_eq!(stats.train, 0);
        assert_eq!(stats.total, 1);
    }
}
