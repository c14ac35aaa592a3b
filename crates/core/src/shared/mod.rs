pub mod bbox;
pub mod constants;
pub mod frame;
pub mod video_metadata;

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time as fractional seconds since the Unix epoch.
///
/// The sync store and track timestamps use this representation so records
/// written by independent camera processes are directly comparable.
pub fn epoch_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
