//! Lazily opened detection resources
//!
//! The camera and both models are acquired on first use and shared for the
//! life of the process. Concurrent first callers wait on the same
//! initialisation. A resource that fails to open stays unavailable; it is
//! not retried.

use crate::infra::config::Config;
use crate::io::frames::{DirectoryFrameSource, FrameSource};
use crate::io::inference::{Detector, HttpDetector, HttpTextReader, TextReader};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

/// Opens the resources a detection session needs
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn open_camera(&self) -> anyhow::Result<Box<dyn FrameSource>>;
    /// None when object detection is not configured
    async fn load_detector(&self) -> anyhow::Result<Option<Arc<dyn Detector>>>;
    async fn load_reader(&self) -> anyhow::Result<Arc<dyn TextReader>>;
}

pub type SharedCamera = Arc<Mutex<Box<dyn FrameSource>>>;

pub struct DetectionSession {
    provider: Arc<dyn SessionProvider>,
    camera: OnceCell<Option<SharedCamera>>,
    detector: OnceCell<Option<Arc<dyn Detector>>>,
    reader: OnceCell<Option<Arc<dyn TextReader>>>,
}

impl DetectionSession {
    pub fn new(provider: Arc<dyn SessionProvider>) -> Self {
        Self {
            provider,
            camera: OnceCell::new(),
            detector: OnceCell::new(),
            reader: OnceCell::new(),
        }
    }

    /// Camera handle, opened on first call; None if it could not be opened
    pub async fn camera(&self) -> Option<SharedCamera> {
        self.camera
            .get_or_init(|| async {
                match self.provider.open_camera().await {
                    Ok(source) => {
                        info!("camera_opened");
                        Some(Arc::new(Mutex::new(source)))
                    }
                    Err(e) => {
                        warn!(error = %format!("{:#}", e), "camera_unavailable");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    pub async fn detector(&self) -> Option<Arc<dyn Detector>> {
        self.detector
            .get_or_init(|| async {
                match self.provider.load_detector().await {
                    Ok(Some(detector)) => {
                        info!("detector_loaded");
                        Some(detector)
                    }
                    Ok(None) => {
                        info!("detector_disabled");
                        None
                    }
                    Err(e) => {
                        warn!(error = %format!("{:#}", e), "detector_unavailable");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    pub async fn reader(&self) -> Option<Arc<dyn TextReader>> {
        self.reader
            .get_or_init(|| async {
                match self.provider.load_reader().await {
                    Ok(reader) => {
                        info!("reader_loaded");
                        Some(reader)
                    }
                    Err(e) => {
                        warn!(error = %format!("{:#}", e), "reader_unavailable");
                        None
                    }
                }
            })
            .await
            .clone()
    }
}

/// Provider backed by a frames directory and HTTP model endpoints
pub struct ConfigSessionProvider {
    frames_dir: String,
    fps: u32,
    loop_playback: bool,
    detector_url: String,
    reader_url: String,
    timeout: Duration,
}

impl ConfigSessionProvider {
    pub fn new(config: &Config) -> Self {
        Self {
            frames_dir: config.frames_dir().to_string(),
            fps: config.camera_fps(),
            loop_playback: config.camera_loop(),
            detector_url: config.detector_url().to_string(),
            reader_url: config.reader_url().to_string(),
            timeout: Duration::from_millis(config.inference_timeout_ms()),
        }
    }
}

#[async_trait]
impl SessionProvider for ConfigSessionProvider {
    async fn open_camera(&self) -> anyhow::Result<Box<dyn FrameSource>> {
        let source = DirectoryFrameSource::open(&self.frames_dir, self.fps, self.loop_playback).await?;
        Ok(Box::new(source))
    }

    async fn load_detector(&self) -> anyhow::Result<Option<Arc<dyn Detector>>> {
        if self.detector_url.is_empty() {
            return Ok(None);
        }
        Ok(Some(Arc::new(HttpDetector::new(&self.detector_url, self.timeout)?)))
    }

    async fn load_reader(&self) -> anyhow::Result<Arc<dyn TextReader>> {
        if self.reader_url.is_empty() {
            anyhow::bail!("no text reader endpoint configured");
        }
        Ok(Arc::new(HttpTextReader::new(&self.reader_url, self.timeout)?))
    }
}
