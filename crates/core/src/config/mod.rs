//! Layered configuration.
//!
//! Literal defaults, overridden by an optional `config.yaml`, overridden by
//! per-camera entries from `config/cameras.json`. Unknown file keys are
//! warnings, never errors.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("camera config not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("camera {0}: no source specified")]
    MissingSource(String),
}

// ---------------------------------------------------------------------------
// Application config (config.yaml layer)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct DetectionConfig {
    pub model: String,
    pub image_size: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConfidenceConfig {
    pub threshold: f64,
    pub person: f64,
    pub vehicle: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NmsConfig {
    pub iou_threshold: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    pub iou_threshold: f64,
    pub max_lost: u32,
    pub use_prediction: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ActivityConfig {
    /// Person speed window, in history points.
    pub window: usize,
    /// Stand/move cutoff in px/s.
    pub person_speed_threshold: f64,
    /// Stop/move cutoff in px.
    pub vehicle_displacement_threshold: f64,
    /// History points required before a vehicle is classified from motion.
    pub vehicle_min_history: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HighVisConfig {
    pub h_min: f64,
    pub h_max: f64,
    pub s_min: f64,
    pub v_min: f64,
    /// Minimum high-vis pixel coverage ratio of the torso strip.
    pub coverage: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClothingConfig {
    pub enabled: bool,
    pub high_vis: HighVisConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoConfig {
    /// Fallback when the source reports fps 0.
    pub default_fps: f64,
    /// Target `[width, height]` every frame is resized to.
    pub resize: [u32; 2],
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub detection: DetectionConfig,
    pub confidence: ConfidenceConfig,
    pub nms: NmsConfig,
    pub tracker: TrackerConfig,
    pub activity: ActivityConfig,
    pub clothing: ClothingConfig,
    pub video: VideoConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            detection: DetectionConfig {
                model: "yolo11m".to_string(),
                image_size: 640,
            },
            confidence: ConfidenceConfig {
                threshold: 0.25,
                person: 0.35,
                vehicle: 0.65,
            },
            nms: NmsConfig { iou_threshold: 0.45 },
            tracker: TrackerConfig {
                iou_threshold: 0.2,
                max_lost: 45,
                use_prediction: true,
            },
            activity: ActivityConfig {
                window: 15,
                person_speed_threshold: 15.0,
                vehicle_displacement_threshold: 8.0,
                vehicle_min_history: 5,
            },
            clothing: ClothingConfig {
                enabled: true,
                high_vis: HighVisConfig {
                    h_min: 5.0,
                    h_max: 35.0,
                    s_min: 100.0,
                    v_min: 100.0,
                    coverage: 0.03,
                },
            },
            video: VideoConfig {
                default_fps: 25.0,
                resize: [640, 480],
            },
        }
    }
}

impl AppConfig {
    /// Load defaults layered with an optional YAML override file.
    ///
    /// A missing or unreadable file leaves the defaults in place with a
    /// warning; the pipeline never fails over its app-level config.
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = AppConfig::default();
        let path = path.unwrap_or(Path::new("config.yaml"));

        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => {
                log::warn!("Config file not found at {}, using defaults", path.display());
                return config;
            }
        };

        match serde_yaml::from_str::<AppConfigFile>(&text) {
            Ok(file) => {
                file.apply(&mut config);
                log::info!("Loaded configuration from {}", path.display());
            }
            Err(e) => {
                log::warn!("Failed to parse {}: {e}, using defaults", path.display());
            }
        }

        config
    }
}

/// Partial mirror of [`AppConfig`] for the YAML override layer.
///
/// Every field is optional; present values replace the defaults. Keys that
/// match no field collect into the flattened maps and are reported once.
#[derive(Deserialize, Debug, Default)]
struct AppConfigFile {
    detection: Option<DetectionSection>,
    confidence: Option<ConfidenceSection>,
    nms: Option<NmsSection>,
    tracker: Option<TrackerSection>,
    activity: Option<ActivitySection>,
    clothing: Option<ClothingSection>,
    video: Option<VideoSection>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct DetectionSection {
    model: Option<String>,
    image_size: Option<u32>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct ConfidenceSection {
    threshold: Option<f64>,
    person: Option<f64>,
    vehicle: Option<f64>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct NmsSection {
    iou_threshold: Option<f64>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct TrackerSection {
    iou_threshold: Option<f64>,
    max_lost: Option<u32>,
    use_prediction: Option<bool>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct ActivitySection {
    window: Option<usize>,
    person: Option<PersonActivitySection>,
    vehicle: Option<VehicleActivitySection>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct PersonActivitySection {
    speed_threshold: Option<f64>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct VehicleActivitySection {
    displacement_threshold: Option<f64>,
    min_history: Option<usize>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct ClothingSection {
    enabled: Option<bool>,
    high_vis: Option<HighVisSection>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct HighVisSection {
    h_min: Option<f64>,
    h_max: Option<f64>,
    s_min: Option<f64>,
    v_min: Option<f64>,
    coverage: Option<f64>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct VideoSection {
    default_fps: Option<f64>,
    resize: Option<[u32; 2]>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_yaml::Value>,
}

fn warn_unknown(section: &str, unknown: &BTreeMap<String, serde_yaml::Value>) {
    for key in unknown.keys() {
        log::warn!("Ignoring unknown config key {section}{key}");
    }
}

impl AppConfigFile {
    fn apply(self, config: &mut AppConfig) {
        warn_unknown("", &self.unknown);

        if let Some(d) = self.detection {
            warn_unknown("detection.", &d.unknown);
            if let Some(v) = d.model {
                config.detection.model = v;
            }
            if let Some(v) = d.image_size {
                config.detection.image_size = v;
            }
        }
        if let Some(c) = self.confidence {
            warn_unknown("confidence.", &c.unknown);
            if let Some(v) = c.threshold {
                config.confidence.threshold = v;
            }
            if let Some(v) = c.person {
                config.confidence.person = v;
            }
            if let Some(v) = c.vehicle {
                config.confidence.vehicle = v;
            }
        }
        if let Some(n) = self.nms {
            warn_unknown("nms.", &n.unknown);
            if let Some(v) = n.iou_threshold {
                config.nms.iou_threshold = v;
            }
        }
        if let Some(t) = self.tracker {
            warn_unknown("tracker.", &t.unknown);
            if let Some(v) = t.iou_threshold {
                config.tracker.iou_threshold = v;
            }
            if let Some(v) = t.max_lost {
                config.tracker.max_lost = v;
            }
            if let Some(v) = t.use_prediction {
                config.tracker.use_prediction = v;
            }
        }
        if let Some(a) = self.activity {
            warn_unknown("activity.", &a.unknown);
            if let Some(v) = a.window {
                config.activity.window = v;
            }
            if let Some(p) = a.person {
                warn_unknown("activity.person.", &p.unknown);
                if let Some(v) = p.speed_threshold {
                    config.activity.person_speed_threshold = v;
                }
            }
            if let Some(v) = a.vehicle {
                warn_unknown("activity.vehicle.", &v.unknown);
                if let Some(d) = v.displacement_threshold {
                    config.activity.vehicle_displacement_threshold = d;
                }
                if let Some(m) = v.min_history {
                    config.activity.vehicle_min_history = m;
                }
            }
        }
        if let Some(c) = self.clothing {
            warn_unknown("clothing.", &c.unknown);
            if let Some(v) = c.enabled {
                config.clothing.enabled = v;
            }
            if let Some(h) = c.high_vis {
                warn_unknown("clothing.high_vis.", &h.unknown);
                if let Some(v) = h.h_min {
                    config.clothing.high_vis.h_min = v;
                }
                if let Some(v) = h.h_max {
                    config.clothing.high_vis.h_max = v;
                }
                if let Some(v) = h.s_min {
                    config.clothing.high_vis.s_min = v;
                }
                if let Some(v) = h.v_min {
                    config.clothing.high_vis.v_min = v;
                }
                if let Some(v) = h.coverage {
                    config.clothing.high_vis.coverage = v;
                }
            }
        }
        if let Some(v) = self.video {
            warn_unknown("video.", &v.unknown);
            if let Some(fps) = v.default_fps {
                config.video.default_fps = fps;
            }
            if let Some(r) = v.resize {
                config.video.resize = r;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Camera launcher config (config/cameras.json layer)
// ---------------------------------------------------------------------------

/// A video source: an integer capture-device index or a path/URL.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum SourceSpec {
    Device(u32),
    Uri(String),
}

impl SourceSpec {
    /// Location the video reader opens. Device indices map to V4L paths.
    pub fn location(&self) -> String {
        match self {
            SourceSpec::Device(n) => format!("/dev/video{n}"),
            SourceSpec::Uri(s) => s.clone(),
        }
    }
}

/// One entry of `config/cameras.json`: a source plus optional per-camera
/// overrides of the app-level defaults.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct CameraConfig {
    pub source: Option<SourceSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub det_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imgsz: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf_person: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conf_vehicle: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize: Option<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_frames: Option<u64>,
}

/// Load the camera map from a JSON file.
///
/// Unlike the YAML layer, a missing or malformed camera file is a hard
/// error: the launcher has nothing to run without it.
pub fn load_cameras(path: &Path) -> Result<BTreeMap<String, CameraConfig>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }
    let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| ConfigError::Json {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// Resolved per-camera settings
// ---------------------------------------------------------------------------

/// Flat, fully-resolved settings for one camera pipeline: app defaults,
/// file overrides, and per-camera overrides already layered.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub camera_id: String,
    pub source: SourceSpec,
    pub output: Option<PathBuf>,
    pub model: String,
    pub image_size: u32,
    pub conf_threshold: f64,
    pub conf_person: f64,
    pub conf_vehicle: f64,
    pub nms_iou: f64,
    pub tracker: TrackerConfig,
    pub activity: ActivityConfig,
    pub clothing: ClothingConfig,
    pub default_fps: f64,
    pub resize: [u32; 2],
    pub max_frames: Option<u64>,
}

impl PipelineSettings {
    pub fn resolve(
        app: &AppConfig,
        camera_id: &str,
        camera: &CameraConfig,
    ) -> Result<Self, ConfigError> {
        let source = camera
            .source
            .clone()
            .ok_or_else(|| ConfigError::MissingSource(camera_id.to_string()))?;

        Ok(Self {
            camera_id: camera_id.to_string(),
            source,
            output: camera.output.clone(),
            model: camera
                .det_model
                .clone()
                .unwrap_or_else(|| app.detection.model.clone()),
            image_size: camera.imgsz.unwrap_or(app.detection.image_size),
            conf_threshold: camera.conf_threshold.unwrap_or(app.confidence.threshold),
            conf_person: camera.conf_person.unwrap_or(app.confidence.person),
            conf_vehicle: camera.conf_vehicle.unwrap_or(app.confidence.vehicle),
            nms_iou: app.nms.iou_threshold,
            tracker: app.tracker.clone(),
            activity: app.activity.clone(),
            clothing: app.clothing.clone(),
            default_fps: app.video.default_fps,
            resize: camera.resize.unwrap_or(app.video.resize),
            max_frames: camera.max_frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.detection.image_size, 640);
        assert_relative_eq!(config.confidence.threshold, 0.25);
        assert_relative_eq!(config.confidence.person, 0.35);
        assert_relative_eq!(config.confidence.vehicle, 0.65);
        assert_relative_eq!(config.nms.iou_threshold, 0.45);
        assert_relative_eq!(config.tracker.iou_threshold, 0.2);
        assert_eq!(config.tracker.max_lost, 45);
        assert!(config.tracker.use_prediction);
        assert_eq!(config.activity.window, 15);
        assert_relative_eq!(config.activity.person_speed_threshold, 15.0);
        assert_relative_eq!(config.activity.vehicle_displacement_threshold, 8.0);
        assert_eq!(config.activity.vehicle_min_history, 5);
        assert!(config.clothing.enabled);
        assert_relative_eq!(config.clothing.high_vis.coverage, 0.03);
        assert_relative_eq!(config.video.default_fps, 25.0);
        assert_eq!(config.video.resize, [640, 480]);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = AppConfig::load(Some(Path::new("/nonexistent/config.yaml")));
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_load_overrides_deep_keys() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "tracker:\n  max_lost: 10\nactivity:\n  person:\n    speed_threshold: 3.5\nvideo:\n  resize: [320, 240]\n"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path()));
        assert_eq!(config.tracker.max_lost, 10);
        assert_relative_eq!(config.tracker.iou_threshold, 0.2); // untouched
        assert_relative_eq!(config.activity.person_speed_threshold, 3.5);
        assert_eq!(config.activity.window, 15); // untouched
        assert_eq!(config.video.resize, [320, 240]);
    }

    #[test]
    fn test_load_unknown_keys_are_ignored() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "telemetry:\n  endpoint: nowhere\ntracker:\n  max_lost: 7\n  kalman: true\n"
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path()));
        assert_eq!(config.tracker.max_lost, 7);
    }

    #[test]
    fn test_load_malformed_yaml_uses_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "tracker: [not, a, map").unwrap();
        let config = AppConfig::load(Some(file.path()));
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_source_spec_parses_int_and_string() {
        let cameras: BTreeMap<String, CameraConfig> = serde_json::from_str(
            r#"{
                "cam-a": {"source": 0},
                "cam-b": {"source": "rtsp://yard/track3"}
            }"#,
        )
        .unwrap();
        assert_eq!(cameras["cam-a"].source, Some(SourceSpec::Device(0)));
        assert_eq!(
            cameras["cam-b"].source,
            Some(SourceSpec::Uri("rtsp://yard/track3".to_string()))
        );
    }

    #[test]
    fn test_device_source_location() {
        assert_eq!(SourceSpec::Device(2).location(), "/dev/video2");
        assert_eq!(SourceSpec::Uri("a.mp4".into()).location(), "a.mp4");
    }

    #[test]
    fn test_load_cameras_missing_file_is_error() {
        let err = load_cameras(Path::new("/nonexistent/cameras.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_cameras_invalid_json_is_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "{{not json").unwrap();
        let err = load_cameras(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Json { .. }));
    }

    #[test]
    fn test_resolve_layers_camera_overrides() {
        let app = AppConfig::default();
        let camera = CameraConfig {
            source: Some(SourceSpec::Uri("yard.mp4".into())),
            conf_person: Some(0.5),
            imgsz: Some(320),
            max_frames: Some(100),
            ..CameraConfig::default()
        };

        let settings = PipelineSettings::resolve(&app, "cam-1", &camera).unwrap();
        assert_eq!(settings.camera_id, "cam-1");
        assert_relative_eq!(settings.conf_person, 0.5);
        assert_relative_eq!(settings.conf_vehicle, 0.65); // app default
        assert_eq!(settings.image_size, 320);
        assert_eq!(settings.max_frames, Some(100));
        assert_eq!(settings.resize, [640, 480]);
    }

    #[test]
    fn test_resolve_without_source_is_error() {
        let app = AppConfig::default();
        let err = PipelineSettings::resolve(&app, "cam-1", &CameraConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingSource(_)));
    }
}
