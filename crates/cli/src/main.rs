use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;

use railwatch_core::config::{
    load_cameras, AppConfig, CameraConfig, PipelineSettings, SourceSpec,
};
use railwatch_core::detection::domain::object_detector::ObjectDetector;
use railwatch_core::detection::infrastructure::model_resolver;
use railwatch_core::detection::infrastructure::onnx_yolo_detector::OnnxYoloDetector;
use railwatch_core::pipeline::driver::Pipeline;
use railwatch_core::shared::constants::{
    CAMERAS_CONFIG_PATH, LOGS_DB_PATH, MODELS_DIR, SYNC_FILE_PATH,
};
use railwatch_core::store::activity_log::ActivityLogStore;
use railwatch_core::store::state_sync::SyncStore;
use railwatch_core::video::domain::video_writer::VideoWriter;
use railwatch_core::video::infrastructure::ffmpeg_reader::FfmpegReader;
use railwatch_core::video::infrastructure::ffmpeg_writer::FfmpegWriter;

/// How long children get to shut down after an interrupt before being killed.
const CHILD_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Camera manager: run multiple monitored camera streams simultaneously.
#[derive(Parser)]
#[command(name = "railwatch")]
struct Cli {
    /// Path to JSON configuration file with cameras.
    #[arg(long, default_value = CAMERAS_CONFIG_PATH)]
    config: PathBuf,

    /// Run a single camera: with --source, or naming an entry in --config.
    #[arg(long)]
    camera: Option<String>,

    /// Video source for single camera mode (device index, path, or URL).
    #[arg(long)]
    source: Option<String>,

    /// Create a default configuration file at the given path and exit.
    #[arg(long)]
    create_config: Option<PathBuf>,

    /// Log live per-track summaries while running.
    #[arg(long)]
    show: bool,
}

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(path) = cli.create_config {
        return create_default_config(&path);
    }

    match (&cli.camera, &cli.source) {
        (Some(camera_id), Some(source)) => {
            // Ad-hoc single camera: no config file needed.
            let camera = CameraConfig {
                source: Some(parse_source(source)),
                name: Some(camera_id.clone()),
                ..CameraConfig::default()
            };
            run_camera(camera_id, &camera, cli.show)
        }
        (Some(camera_id), None) => {
            // One entry of the config file, in-process. This is the mode
            // the manager spawns per camera.
            let cameras = load_cameras(&cli.config)?;
            let camera = cameras
                .get(camera_id)
                .ok_or_else(|| format!("Camera {camera_id} not found in {}", cli.config.display()))?;
            run_camera(camera_id, camera, cli.show)
        }
        (None, Some(_)) => Err("--source requires --camera".into()),
        (None, None) => {
            let cameras = load_cameras(&cli.config).map_err(|e| {
                log::info!("Use --create-config to create a default config");
                e
            })?;
            if cameras.is_empty() {
                return Err(format!("No cameras defined in {}", cli.config.display()).into());
            }
            run_manager(&cli.config, &cameras, cli.show)
        }
    }
}

/// Parse a source argument: an integer device index or a path/URL.
fn parse_source(source: &str) -> SourceSpec {
    match source.parse::<u32>() {
        Ok(index) => SourceSpec::Device(index),
        Err(_) => SourceSpec::Uri(source.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Single-camera mode (the per-camera process)
// ---------------------------------------------------------------------------

fn run_camera(
    camera_id: &str,
    camera: &CameraConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = AppConfig::load(None);
    let settings = PipelineSettings::resolve(&app, camera_id, camera)?;

    let detector = build_detector(&settings)?;

    // Storage trouble degrades the run to live-only; it never blocks it.
    let log_store = match ActivityLogStore::open(Path::new(LOGS_DB_PATH)) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            log::warn!("Activity log unavailable: {e}");
            None
        }
    };
    let sync = SyncStore::new(SYNC_FILE_PATH);

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancelled);
    ctrlc::set_handler(move || {
        log::info!("Interrupt received, stopping camera");
        flag.store(true, Ordering::SeqCst);
    })?;

    let writer: Option<Box<dyn VideoWriter>> = settings
        .output
        .is_some()
        .then(|| Box::new(FfmpegWriter::new()) as Box<dyn VideoWriter>);

    log::info!("Starting camera {camera_id} with source {}", settings.source.location());

    let mut pipeline = Pipeline::new(
        settings,
        Box::new(FfmpegReader::new()),
        writer,
        detector,
        log_store,
        sync,
        cancelled,
    )
    .with_show(show);

    pipeline.run()?;
    Ok(())
}

fn build_detector(
    settings: &PipelineSettings,
) -> Result<Box<dyn ObjectDetector>, Box<dyn std::error::Error>> {
    log::info!("Resolving model: {}", settings.model);
    let model_path = model_resolver::resolve(
        &settings.model,
        Path::new(MODELS_DIR),
        Some(Box::new(download_progress)),
    )?;
    eprintln!();

    Ok(Box::new(OnnxYoloDetector::new(
        &model_path,
        settings.image_size,
        settings.conf_threshold,
        settings.nms_iou,
    )))
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading detection model... {pct}%");
    } else {
        eprint!("\rDownloading detection model... {downloaded} bytes");
    }
}

// ---------------------------------------------------------------------------
// Manager mode (one OS process per camera)
// ---------------------------------------------------------------------------

fn run_manager(
    config_path: &Path,
    cameras: &BTreeMap<String, CameraConfig>,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let exe = std::env::current_exe()?;

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })?;

    log::info!("Starting {} camera(s)...", cameras.len());
    let mut children: Vec<(String, process::Child)> = Vec::new();
    for camera_id in cameras.keys() {
        let mut command = process::Command::new(&exe);
        command
            .arg("--camera")
            .arg(camera_id)
            .arg("--config")
            .arg(config_path);
        if show {
            command.arg("--show");
        }

        match command.spawn() {
            Ok(child) => {
                log::info!("Started camera {camera_id} (PID: {})", child.id());
                children.push((camera_id.clone(), child));
            }
            Err(e) => {
                // One camera failing to launch must not stop the others.
                log::error!("Camera {camera_id} failed to start: {e}");
            }
        }
    }

    if children.is_empty() {
        return Err("No camera process could be started".into());
    }
    log::info!("All cameras started. Monitoring...");

    // Wait until every child exits or an interrupt arrives. Children share
    // the foreground process group, so they receive the SIGINT themselves
    // and begin their own graceful shutdown.
    loop {
        if interrupt_rx.try_recv().is_ok() {
            log::info!("Stopping all cameras...");
            stop_children(&mut children);
            break;
        }

        children.retain_mut(|(camera_id, child)| match child.try_wait() {
            Ok(Some(status)) => {
                log::info!("Camera {camera_id} exited with {status}");
                false
            }
            Ok(None) => true,
            Err(e) => {
                log::warn!("Camera {camera_id}: wait failed: {e}");
                false
            }
        });

        if children.is_empty() {
            break;
        }
        std::thread::sleep(Duration::from_millis(200));
    }

    log::info!("All cameras stopped");
    Ok(())
}

/// Give children the stop timeout to finish on their own, then kill.
fn stop_children(children: &mut Vec<(String, process::Child)>) {
    let deadline = Instant::now() + CHILD_STOP_TIMEOUT;
    while Instant::now() < deadline {
        children.retain_mut(|(_, child)| matches!(child.try_wait(), Ok(None)));
        if children.is_empty() {
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    for (camera_id, child) in children.iter_mut() {
        log::warn!("Force killing camera {camera_id} (PID: {})", child.id());
        let _ = child.kill();
        let _ = child.wait();
    }
    children.clear();
}

// ---------------------------------------------------------------------------
// Default config
// ---------------------------------------------------------------------------

fn create_default_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut cameras: BTreeMap<String, CameraConfig> = BTreeMap::new();
    cameras.insert(
        "camera-1".to_string(),
        CameraConfig {
            source: Some(SourceSpec::Uri("data/raw/yard.mp4".to_string())),
            name: Some("Camera 1".to_string()),
            ..CameraConfig::default()
        },
    );

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, serde_json::to_string_pretty(&cameras)?)?;
    log::info!("Created default config at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_device_index() {
        assert_eq!(parse_source("0"), SourceSpec::Device(0));
        assert_eq!(parse_source("3"), SourceSpec::Device(3));
    }

    #[test]
    fn test_parse_source_uri() {
        assert_eq!(
            parse_source("rtsp://yard/track3"),
            SourceSpec::Uri("rtsp://yard/track3".to_string())
        );
        assert_eq!(
            parse_source("data/raw/yard.mp4"),
            SourceSpec::Uri("data/raw/yard.mp4".to_string())
        );
    }

    #[test]
    fn test_create_default_config_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("cameras.json");
        create_default_config(&path).unwrap();

        let cameras = load_cameras(&path).unwrap();
        assert_eq!(cameras.len(), 1);
        assert!(cameras.contains_key("camera-1"));
        assert!(cameras["camera-1"].source.is_some());
    }

    #[test]
    fn test_cli_parses_manager_and_single_modes() {
        let cli = Cli::try_parse_from(["railwatch", "--config", "cams.json"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("cams.json"));
        assert!(cli.camera.is_none());

        let cli = Cli::try_parse_from([
            "railwatch", "--camera", "cam-1", "--source", "0", "--show",
        ])
        .unwrap();
        assert_eq!(cli.camera.as_deref(), Some("cam-1"));
        assert_eq!(cli.source.as_deref(), Some("0"));
        assert!(cli.show);
    }
}
