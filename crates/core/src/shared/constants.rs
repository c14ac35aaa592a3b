pub const DETECTION_MODEL_NAME: &str = "yolo11m.onnx";
pub const DETECTION_MODEL_URL: &str =
    "https://github.com/railwatch/railwatch-models/releases/download/models-v1/yolo11m.onnx";

/// Seconds between progress log lines in the driver loop.
pub const LOG_INTERVAL: f64 = 5.0;

/// Seconds between heartbeat touches in the sync store.
pub const HEARTBEAT_INTERVAL: f64 = 2.0;

/// Seconds between forced activity-log flushes of unchanged activities.
pub const PERIODIC_LOG_INTERVAL: f64 = 30.0;

/// Seconds of heartbeat silence before a camera is considered inactive.
pub const HEARTBEAT_TIMEOUT: f64 = 60.0;

/// Seconds a stopped camera stays hidden from readers after its stop time.
pub const STOP_GRACE: f64 = 300.0;

pub const DEFAULT_CAMERA_ID: &str = "default";

/// Track center history cap; oldest points drop first.
pub const MAX_HISTORY: usize = 50;

/// Lost tracks older than this many frames are not drawn.
pub const OVERLAY_MAX_LOST: u32 = 30;

pub const SYNC_FILE_PATH: &str = "data/shared_state_sync.json";
pub const LOGS_DB_PATH: &str = "data/database/logs.db";
pub const CAMERAS_CONFIG_PATH: &str = "config/cameras.json";
pub const MODELS_DIR: &str = "models";
