//! Per-camera pipeline driver.
//!
//! Owns the frame loop: read → resize → submit to the worker → overlay the
//! latest snapshot → sink, with heartbeat and progress cadences on the
//! side. Every collaborator is injected, so independent pipelines can
//! coexist in one address space.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::activity::classifier::ActivityClassifier;
use crate::config::PipelineSettings;
use crate::detection::domain::confidence_filter::ConfidenceFilter;
use crate::detection::domain::object_detector::ObjectDetector;
use crate::pipeline::overlay::draw_tracks;
use crate::pipeline::publisher::TrackPublisher;
use crate::pipeline::worker::{DetectionWorker, FrameProcessor};
use crate::ppe::high_vis::HighVisDetector;
use crate::shared::constants::{HEARTBEAT_INTERVAL, LOG_INTERVAL, PERIODIC_LOG_INTERVAL};
use crate::store::activity_log::ActivityLogStore;
use crate::store::state_sync::SyncStore;
use crate::tracking::tracker::Tracker;
use crate::video::domain::video_reader::VideoReader;
use crate::video::domain::video_writer::VideoWriter;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("cannot open source {location}: {message}")]
    SourceOpen { location: String, message: String },
    #[error("cannot open output {path}: {message}")]
    SinkOpen { path: PathBuf, message: String },
    #[error("pipeline already ran; its detector is consumed")]
    AlreadyRan,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub frames: u64,
    pub elapsed_seconds: f64,
}

/// Everything a camera pipeline talks to, injected at construction.
pub struct Pipeline {
    settings: PipelineSettings,
    reader: Box<dyn VideoReader>,
    writer: Option<Box<dyn VideoWriter>>,
    detector: Option<Box<dyn ObjectDetector>>,
    log_store: Option<Arc<ActivityLogStore>>,
    sync: SyncStore,
    cancelled: Arc<AtomicBool>,
    show: bool,
}

impl Pipeline {
    pub fn new(
        settings: PipelineSettings,
        reader: Box<dyn VideoReader>,
        writer: Option<Box<dyn VideoWriter>>,
        detector: Box<dyn ObjectDetector>,
        log_store: Option<Arc<ActivityLogStore>>,
        sync: SyncStore,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            settings,
            reader,
            writer,
            detector: Some(detector),
            log_store,
            sync,
            cancelled,
            show: false,
        }
    }

    /// Also log live per-track summaries at the progress cadence.
    pub fn with_show(mut self, show: bool) -> Self {
        self.show = show;
        self
    }

    /// Run until the source is exhausted, the frame budget is hit, or
    /// cancellation is requested.
    ///
    /// Only setup failures (source, sink) surface as errors; everything
    /// after the loop starts degrades locally.
    pub fn run(&mut self) -> Result<PipelineReport, PipelineError> {
        if self.detector.is_none() {
            return Err(PipelineError::AlreadyRan);
        }
        let camera_id = self.settings.camera_id.clone();
        let location = self.settings.source.location();

        let metadata = self
            .reader
            .open(&location)
            .map_err(|e| PipelineError::SourceOpen {
                location: location.clone(),
                message: e.to_string(),
            })?;

        let fps = if metadata.fps > 0.0 {
            metadata.fps
        } else {
            self.settings.default_fps
        };
        let [target_w, target_h] = self.settings.resize;

        log::info!(
            "Camera {camera_id}: source {location} ({}x{} @ {fps:.1} fps), processing at {target_w}x{target_h}",
            metadata.width,
            metadata.height,
        );

        if let (Some(writer), Some(output)) = (self.writer.as_mut(), self.settings.output.clone())
        {
            let sink_metadata = crate::shared::video_metadata::VideoMetadata {
                width: target_w,
                height: target_h,
                fps,
                total_frames: metadata.total_frames,
                codec: String::new(),
                source_path: metadata.source_path.clone(),
            };
            if let Err(e) = writer.open(&output, &sink_metadata) {
                self.reader.close();
                return Err(PipelineError::SinkOpen {
                    path: output,
                    message: e.to_string(),
                });
            }
        }

        let mut worker = DetectionWorker::new(self.build_processor(fps));
        self.sync.register_start(&camera_id);
        worker.start();

        let report = self.frame_loop(&mut worker, target_w, target_h);

        // Teardown runs regardless of how the loop ended.
        worker.stop();
        if let Some(writer) = self.writer.as_mut() {
            if let Err(e) = writer.close() {
                log::warn!("Camera {camera_id}: failed to close output: {e}");
            }
        }
        self.reader.close();
        self.sync.register_stop(&camera_id);

        log::info!(
            "Camera {camera_id}: processed {} frames in {:.2}s ({:.2} fps)",
            report.frames,
            report.elapsed_seconds,
            report.frames as f64 / report.elapsed_seconds.max(f64::EPSILON),
        );

        Ok(report)
    }

    fn build_processor(&mut self, fps: f64) -> FrameProcessor {
        let settings = &self.settings;
        // Checked at the top of run().
        let detector = self.detector.take().unwrap();

        let ppe = settings
            .clothing
            .enabled
            .then(|| HighVisDetector::new(settings.clothing.high_vis.clone()));

        let publisher = TrackPublisher::new(
            &settings.camera_id,
            self.log_store.clone(),
            Some(self.sync.clone()),
            Duration::from_secs_f64(PERIODIC_LOG_INTERVAL),
        );

        FrameProcessor::new(
            detector,
            ConfidenceFilter::new(settings.conf_person, settings.conf_vehicle),
            Tracker::new(
                settings.tracker.iou_threshold,
                settings.tracker.max_lost,
                settings.tracker.use_prediction,
            ),
            ActivityClassifier::new(fps, &settings.activity),
            ppe,
            publisher,
        )
    }

    fn frame_loop(&mut self, worker: &mut DetectionWorker, target_w: u32, target_h: u32) -> PipelineReport {
        let camera_id = self.settings.camera_id.clone();
        let max_frames = self.settings.max_frames;
        let show = self.show;

        let start = Instant::now();
        let heartbeat_every = Duration::from_secs_f64(HEARTBEAT_INTERVAL);
        let log_every = Duration::from_secs_f64(LOG_INTERVAL);
        let mut last_heartbeat = Instant::now();
        let mut last_log = Instant::now();
        let mut frame_count: u64 = 0;

        let mut writer_broken = false;
        let mut sink = self.writer.as_mut();

        for frame_result in self.reader.frames() {
            if self.cancelled.load(Ordering::SeqCst) {
                log::info!("Camera {camera_id}: cancellation requested");
                break;
            }

            let frame = match frame_result {
                Ok(frame) => frame,
                Err(e) => {
                    log::warn!("Camera {camera_id}: frame read failed: {e}");
                    break;
                }
            };

            frame_count += 1;
            let mut frame = frame.resized(target_w, target_h);

            worker.submit(frame.clone());

            let tracks = worker.snapshot();
            draw_tracks(&mut frame, &tracks);

            if let (Some(writer), false) = (sink.as_mut(), writer_broken) {
                if let Err(e) = writer.write(&frame) {
                    // A broken sink degrades the run to analysis-only.
                    log::warn!("Camera {camera_id}: sink write failed, disabling output: {e}");
                    writer_broken = true;
                }
            }

            if last_heartbeat.elapsed() >= heartbeat_every {
                self.sync.heartbeat(&camera_id);
                last_heartbeat = Instant::now();
            }

            if last_log.elapsed() >= log_every {
                let persons = tracks
                    .iter()
                    .filter(|t| t.class_name.as_deref() == Some("person"))
                    .count();
                let trains = tracks
                    .iter()
                    .filter(|t| t.class_name.as_deref() == Some("train"))
                    .count();
                let observed_fps = frame_count as f64 / start.elapsed().as_secs_f64().max(f64::EPSILON);
                log::info!(
                    "Camera {camera_id}: frame {frame_count}, {persons} person(s), {trains} train(s), {observed_fps:.1} fps"
                );
                if show {
                    for track in &tracks {
                        log::info!(
                            "Camera {camera_id}:   #{} {} {} conf {:.2}",
                            track.id,
                            track.class_name.as_deref().unwrap_or("unknown"),
                            track
                                .activity
                                .map(|a| a.as_str())
                                .unwrap_or("-"),
                            track.activity_conf,
                        );
                    }
                }
                last_log = Instant::now();
            }

            if let Some(max) = max_frames {
                if frame_count >= max {
                    log::info!("Camera {camera_id}: frame budget of {max} reached");
                    break;
                }
            }
        }

        PipelineReport {
            frames: frame_count,
            elapsed_seconds: start.elapsed().as_secs_f64(),
        }
    }
}
