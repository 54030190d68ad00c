//! Scripted collaborators shared by integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gate_access::domain::{
    BoundingBox, Frame, ManualClock, ObjectDetection, TextFragment, Vehicle, VehicleId, VehicleStatus,
};
use gate_access::infra::Metrics;
use gate_access::io::{
    AccessLogStore, Detector, FrameSource, MemoryNotificationSink, MemoryRegistry, SmsGateway,
    TextReader, VehicleRegistry,
};
use gate_access::services::{
    create_notifier, latest_scan_channel, AccessPipeline, LatestScanReader, NoticeText,
    NotificationWorker, PipelineDeps, PipelineSettings, SessionProvider,
};
use image::RgbImage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn t0() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-05-04T09:00:00Z").unwrap().with_timezone(&Utc)
}

pub fn blank_frame() -> Frame {
    RgbImage::new(320, 240)
}

pub fn vehicle(id: &str, plate: &str, status: VehicleStatus, phone: Option<&str>) -> Vehicle {
    Vehicle {
        id: VehicleId::from(id),
        plate_number: plate.to_string(),
        owner_id: Some(format!("usr-{id}")),
        owner_name: Some("Owner".to_string()),
        owner_phone: phone.map(str::to_string),
        status,
    }
}

pub fn fragment(text: &str, x: f32, y: f32) -> TextFragment {
    TextFragment { bounds: BoundingBox::new(x, y, x + 40.0, y + 20.0), text: text.to_string(), confidence: 0.9 }
}

/// Plays a fixed list of frames, then reports end of stream
pub struct ScriptedFrames {
    frames: VecDeque<Frame>,
}

impl ScriptedFrames {
    pub fn new(count: usize) -> Self {
        Self { frames: (0..count).map(|_| blank_frame()).collect() }
    }
}

#[async_trait]
impl FrameSource for ScriptedFrames {
    async fn read(&mut self) -> anyhow::Result<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}

/// Returns the scripted fragments per call, then repeats the last entry
pub struct ScriptedReader {
    script: Mutex<VecDeque<anyhow::Result<Vec<TextFragment>>>>,
    last: Mutex<Vec<TextFragment>>,
    pub calls: AtomicUsize,
}

impl ScriptedReader {
    pub fn new(script: Vec<anyhow::Result<Vec<TextFragment>>>) -> Self {
        Self { script: Mutex::new(script.into()), last: Mutex::new(Vec::new()), calls: AtomicUsize::new(0) }
    }

    /// Same fragments on every call
    pub fn constant(fragments: Vec<TextFragment>) -> Self {
        let reader = Self::new(Vec::new());
        *reader.last.lock() = fragments;
        reader
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextReader for ScriptedReader {
    async fn read_text(&self, _frame: &Frame) -> anyhow::Result<Vec<TextFragment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(Ok(fragments)) => {
                *self.last.lock() = fragments.clone();
                Ok(fragments)
            }
            Some(Err(e)) => Err(e),
            None => Ok(self.last.lock().clone()),
        }
    }
}

/// Reports the same objects on every call
pub struct ScriptedDetector(pub Vec<ObjectDetection>);

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(&self, _frame: &Frame) -> anyhow::Result<Vec<ObjectDetection>> {
        Ok(self.0.clone())
    }
}

pub fn object(label: &str, confidence: f32) -> ObjectDetection {
    ObjectDetection { label: label.to_string(), bounds: BoundingBox::new(0.0, 0.0, 300.0, 200.0), confidence }
}

pub struct FailingDetector;

#[async_trait]
impl Detector for FailingDetector {
    async fn detect(&self, _frame: &Frame) -> anyhow::Result<Vec<ObjectDetection>> {
        anyhow::bail!("detector offline")
    }
}

#[derive(Default)]
pub struct RecordingSms {
    pub sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl SmsGateway for RecordingSms {
    async fn send(&self, phone: &str, message: &str) -> anyhow::Result<()> {
        self.sent.lock().push((phone.to_string(), message.to_string()));
        Ok(())
    }
}

/// Hands out the scripted camera once; models are shared
pub struct ScriptedProvider {
    camera: Mutex<Option<Box<dyn FrameSource>>>,
    detector: Option<Arc<dyn Detector>>,
    reader: Arc<dyn TextReader>,
}

impl ScriptedProvider {
    pub fn new(camera: Option<Box<dyn FrameSource>>, reader: Arc<dyn TextReader>) -> Self {
        Self { camera: Mutex::new(camera), detector: None, reader }
    }

    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = Some(detector);
        self
    }
}

#[async_trait]
impl SessionProvider for ScriptedProvider {
    async fn open_camera(&self) -> anyhow::Result<Box<dyn FrameSource>> {
        self.camera.lock().take().ok_or_else(|| anyhow::anyhow!("camera not connected"))
    }

    async fn load_detector(&self) -> anyhow::Result<Option<Arc<dyn Detector>>> {
        Ok(self.detector.clone())
    }

    async fn load_reader(&self) -> anyhow::Result<Arc<dyn TextReader>> {
        Ok(self.reader.clone())
    }
}

/// A pipeline wired to in-memory collaborators
pub struct TestPipeline {
    pub pipeline: AccessPipeline,
    pub clock: Arc<ManualClock>,
    pub latest: LatestScanReader,
    pub sink: Arc<MemoryNotificationSink>,
    pub sms: Arc<RecordingSms>,
    pub metrics: Arc<Metrics>,
    pub worker: NotificationWorker,
}

pub fn build_pipeline(
    registry: Arc<dyn VehicleRegistry>,
    access_log: Arc<dyn AccessLogStore>,
) -> TestPipeline {
    let clock = Arc::new(ManualClock::new(t0()));
    let metrics = Arc::new(Metrics::new());
    let sink = Arc::new(MemoryNotificationSink::new());
    let sms = Arc::new(RecordingSms::default());
    let (latest_tx, latest) = latest_scan_channel();
    let (notifier, worker) = create_notifier(
        Some(sms.clone() as Arc<dyn SmsGateway>),
        sink.clone(),
        NoticeText { brand: "GateAccess".to_string(), site_name: "campus".to_string() },
        2,
        16,
        metrics.clone(),
    );
    let pipeline = AccessPipeline::new(
        PipelineSettings {
            gate_name: "Main Gate".to_string(),
            dwell: chrono::Duration::seconds(30),
            cooldown: chrono::Duration::seconds(30),
        },
        PipelineDeps {
            registry,
            access_log,
            notifier,
            latest: latest_tx,
            captures: None,
            clock: clock.clone(),
            metrics: metrics.clone(),
        },
    );
    TestPipeline { pipeline, clock, latest, sink, sms, metrics, worker }
}

pub fn registry() -> Arc<MemoryRegistry> {
    Arc::new(MemoryRegistry::new(vec![
        vehicle("veh-1", "XYZ 999", VehicleStatus::Active, Some("09171234567")),
        vehicle("veh-2", "NYE 123", VehicleStatus::Active, None),
        vehicle("veh-3", "BLK-777", VehicleStatus::Blacklisted, Some("09170000000")),
    ]))
}
