//! Detection loop - frame pull, periodic plate detection, live feed publish
//!
//! Every frame is published to the live feed with the current overlays drawn.
//! Every Nth frame (starting with the first) runs a detection cycle:
//! object detector for activity, text reader for plate fragments, grouping,
//! normalization and the access pipeline. Overlays from a cycle stay on the
//! feed until the next cycle replaces them.

use crate::domain::plate::{normalize, PlateToken};
use crate::domain::types::{BoundingBox, Frame, TextFragment};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::frames::{draw_overlays, encode_jpeg, JPEG_QUALITY};
use crate::services::feed::{FeedPublisher, CAMERA_UNAVAILABLE, STREAM_ENDED};
use crate::services::grouping::{group_fragments, GroupingTolerance};
use crate::services::pipeline::{AccessPipeline, PlateOutcome};
use crate::services::session::DetectionSession;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub interval_frames: u64,
    pub object_confidence: f32,
    pub text_confidence: f32,
    pub tolerance: GroupingTolerance,
    pub min_plate_chars: usize,
    pub substitutions: HashMap<char, char>,
}

impl LoopSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval_frames: config.detection_interval_frames(),
            object_confidence: config.object_confidence(),
            text_confidence: config.text_confidence(),
            tolerance: GroupingTolerance {
                vertical_px: config.group_vertical_tolerance_px(),
                horizontal_gap_px: config.group_horizontal_gap_px(),
            },
            min_plate_chars: config.min_plate_chars(),
            substitutions: config.substitutions().clone(),
        }
    }

    /// Normalize, substitute and length-check a candidate's text
    pub fn accept(&self, text: &str) -> Option<PlateToken> {
        let token = normalize(text).ok()?.substitute(&self.substitutions);
        (token.alnum_count() >= self.min_plate_chars).then_some(token)
    }

    /// Confident fragments grouped into plates, left to right within a row
    pub fn plates(&self, fragments: Vec<TextFragment>) -> Vec<(PlateToken, BoundingBox)> {
        let confident = fragments.into_iter().filter(|f| f.confidence > self.text_confidence).collect();
        group_fragments(confident, &self.tolerance)
            .into_iter()
            .filter_map(|candidate| Some((self.accept(&candidate.text())?, candidate.bounds())))
            .collect()
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            interval_frames: 30,
            object_confidence: 0.4,
            text_confidence: 0.3,
            tolerance: GroupingTolerance::default(),
            min_plate_chars: 5,
            substitutions: HashMap::new(),
        }
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    CameraUnavailable,
    EndOfStream,
    ReadFailed,
    Shutdown,
}

pub struct DetectionLoop {
    session: Arc<DetectionSession>,
    pipeline: AccessPipeline,
    settings: LoopSettings,
    feed: FeedPublisher,
    metrics: Arc<Metrics>,
    overlays: Vec<BoundingBox>,
    frame_index: u64,
}

impl DetectionLoop {
    pub fn new(
        session: Arc<DetectionSession>,
        pipeline: AccessPipeline,
        settings: LoopSettings,
        feed: FeedPublisher,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { session, pipeline, settings, feed, metrics, overlays: Vec::new(), frame_index: 0 }
    }

    /// Run until the source ends, fails, or shutdown is signalled
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> LoopExit {
        let Some(camera) = self.session.camera().await else {
            self.feed.end(CAMERA_UNAVAILABLE);
            return LoopExit::CameraUnavailable;
        };
        let mut camera = camera.lock().await;
        info!(interval_frames = %self.settings.interval_frames, "detection_loop_started");

        let exit = loop {
            if *shutdown.borrow() {
                break LoopExit::Shutdown;
            }

            let read = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break LoopExit::Shutdown;
                    }
                    continue;
                }
                read = camera.read() => read,
            };

            match read {
                Ok(Some(frame)) => self.handle_frame(frame).await,
                Ok(None) => break LoopExit::EndOfStream,
                Err(e) => {
                    warn!(error = %format!("{:#}", e), "frame_read_failed");
                    break LoopExit::ReadFailed;
                }
            }
        };

        match exit {
            LoopExit::ReadFailed => self.feed.end(CAMERA_UNAVAILABLE),
            _ => self.feed.end(STREAM_ENDED),
        }
        info!(exit = ?exit, frames = %self.frame_index, "detection_loop_stopped");
        exit
    }

    async fn handle_frame(&mut self, mut frame: Frame) {
        self.metrics.record_frame();

        let interval = self.settings.interval_frames.max(1);
        if self.frame_index % interval == 0 {
            self.overlays = self.detect(&frame).await;
        }
        self.frame_index += 1;

        draw_overlays(&mut frame, &self.overlays);
        match encode_jpeg(&frame, JPEG_QUALITY) {
            Ok(jpeg) => {
                self.feed.publish(jpeg);
            }
            Err(e) => {
                self.metrics.record_encode_error();
                debug!(error = %format!("{:#}", e), "frame_encode_failed");
            }
        }
    }

    /// One detection cycle; returns the overlays for accepted plates
    async fn detect(&mut self, frame: &Frame) -> Vec<BoundingBox> {
        let started = Instant::now();

        if let Some(detector) = self.session.detector().await {
            match detector.detect(frame).await {
                Ok(objects) => {
                    let active = objects
                        .iter()
                        .filter(|o| o.confidence > self.settings.object_confidence)
                        .count();
                    debug!(objects = %active, "objects_detected");
                }
                Err(e) => {
                    self.metrics.record_detector_error();
                    warn!(error = %format!("{:#}", e), "detector_failed");
                }
            }
        }

        let fragments = self.read_fragments(frame).await;

        let mut overlays = Vec::new();
        for (token, bounds) in self.settings.plates(fragments) {
            let outcome = self.pipeline.process(&token, frame).await;
            debug!(plate = %token, outcome = %outcome_name(&outcome), "plate_processed");
            overlays.push(bounds);
        }

        self.metrics.record_cycle(started.elapsed().as_millis() as u64);
        overlays
    }

    async fn read_fragments(&self, frame: &Frame) -> Vec<TextFragment> {
        let Some(reader) = self.session.reader().await else {
            return Vec::new();
        };
        match reader.read_text(frame).await {
            Ok(fragments) => fragments,
            Err(e) => {
                self.metrics.record_reader_error();
                warn!(error = %format!("{:#}", e), "reader_failed");
                Vec::new()
            }
        }
    }
}

fn outcome_name(outcome: &PlateOutcome) -> &'static str {
    match outcome {
        PlateOutcome::Logged(_) => "logged",
        PlateOutcome::SuppressedCooldown => "cooldown",
        PlateOutcome::SuppressedDwell => "dwell",
        PlateOutcome::Dropped => "dropped",
    }
}
