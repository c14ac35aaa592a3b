//! Read API over the live sync store and the durable activity log.
//!
//! This is the surface an HTTP layer would bind route-for-route; the
//! server itself is an external collaborator and stays out of this crate.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::shared::epoch_seconds;
use crate::store::activity_log::{ActivityLogStore, LogQuery, LogRecord, LogStoreError};
use crate::store::state_sync::{CameraStats, SyncStore};

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

/// One page of historical activity records.
#[derive(Debug, Serialize)]
pub struct LogsPage {
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
    pub detections: Vec<LogRecord>,
}

/// Live aggregate across all running cameras.
#[derive(Debug, Serialize)]
pub struct CurrentStats {
    pub person_count: u64,
    pub train_count: u64,
    pub total_tracks: u64,
    pub timestamp: f64,
}

#[derive(Debug, Serialize)]
pub struct CameraSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: &'static str,
    pub stats: CameraStats,
}

pub struct QueryService {
    logs: ActivityLogStore,
    sync: SyncStore,
    camera_names: BTreeMap<String, String>,
}

impl QueryService {
    pub fn new(logs: ActivityLogStore, sync: SyncStore) -> Self {
        Self {
            logs,
            sync,
            camera_names: BTreeMap::new(),
        }
    }

    /// Attach display names (from the launcher config) to camera ids.
    pub fn with_camera_names(mut self, names: BTreeMap<String, String>) -> Self {
        self.camera_names = names;
        self
    }

    /// Whether the durable log is reachable.
    pub fn healthy(&self) -> bool {
        self.logs.ping()
    }

    /// Historical records with filters and clamped pagination:
    /// `limit` falls into [1, 1000] (0 means the default of 100).
    pub fn logs(&self, query: LogQuery) -> Result<LogsPage, LogStoreError> {
        let mut query = query;
        if query.limit == 0 {
            query.limit = DEFAULT_LIMIT;
        }
        query.limit = query.limit.clamp(1, MAX_LIMIT);

        let total = self.logs.count(&query)?;
        let detections = self.logs.get_logs(&query)?;
        Ok(LogsPage {
            total,
            limit: query.limit,
            offset: query.offset,
            detections,
        })
    }

    /// Live counts aggregated across running cameras.
    pub fn current_stats(&self) -> CurrentStats {
        let mut person_count = 0;
        let mut train_count = 0;
        let mut total_tracks = 0;
        for tracks in self.sync.all_tracks().values() {
            for track in tracks {
                match track.class_name.as_str() {
                    "person" => person_count += 1,
                    "train" => train_count += 1,
                    _ => {}
                }
                total_tracks += 1;
            }
        }
        CurrentStats {
            person_count,
            train_count,
            total_tracks,
            timestamp: epoch_seconds(),
        }
    }

    /// Running cameras with their per-class stats.
    pub fn cameras(&self) -> Vec<CameraSummary> {
        self.sync
            .running_ids()
            .into_iter()
            .map(|id| {
                let stats = self.sync.stats(&id);
                CameraSummary {
                    name: self.camera_names.get(&id).cloned(),
                    id,
                    status: "running",
                    stats,
                }
            })
            .collect()
    }

    /// Stats for one camera, `None` when the id is entirely unknown
    /// (neither in the sync document nor configured).
    pub fn camera_stats(&self, camera_id: &str) -> Option<CameraStats> {
        let known = self.sync.known_ids().iter().any(|id| id == camera_id)
            || self.camera_names.contains_key(camera_id);
        if !known {
            return None;
        }
        Some(self.sync.stats(camera_id))
    }
}
