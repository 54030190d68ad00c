//! One-shot scan of an uploaded image
//!
//! The image must contain a vehicle (car, motorcycle, bus or truck above
//! `VEHICLE_CONFIDENCE`). The first accepted plate is matched against the
//! registry and logged as an Entry. Uploads bypass cooldown and dwell, do not
//! notify owners and do not replace the latest live scan.

use crate::domain::clock::Clock;
use crate::domain::plate::PlatePattern;
use crate::domain::types::{AccessAction, AccessLogEntry, Frame, ObjectDetection, Vehicle};
use crate::infra::metrics::Metrics;
use crate::io::access_log::AccessLogStore;
use crate::io::registry::VehicleRegistry;
use crate::services::access::decide;
use crate::services::detection_loop::LoopSettings;
use crate::services::session::DetectionSession;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Detector labels that count as a vehicle
pub const VEHICLE_LABELS: [&str; 4] = ["car", "motorcycle", "bus", "truck"];

pub const VEHICLE_CONFIDENCE: f32 = 0.5;

pub const PLATE_NOT_DETECTED: &str = "Not Detected";
pub const PLATE_READ_ERROR: &str = "OCR Error";
pub const STATUS_STORE_ERROR: &str = "ERROR (STORE)";

/// Response body for an uploaded image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageScan {
    /// "success", or "warning" when no detector is available
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub detected: bool,
    pub plate_number: String,
    pub confidence: f32,
    pub vehicle_type: String,
    pub access_granted: bool,
    pub access_status: String,
    pub vehicle_info: Option<Vehicle>,
}

impl ImageScan {
    fn unavailable(detail: &str) -> Self {
        Self {
            status: "warning",
            detail: Some(detail.to_string()),
            vehicle_type: "Unknown".to_string(),
            ..Self::no_vehicle()
        }
    }

    fn no_vehicle() -> Self {
        Self {
            status: "success",
            detail: None,
            detected: false,
            plate_number: PLATE_NOT_DETECTED.to_string(),
            confidence: 0.0,
            vehicle_type: "None".to_string(),
            access_granted: false,
            access_status: "DENIED".to_string(),
            vehicle_info: None,
        }
    }

    fn vehicle(found: &ObjectDetection) -> Self {
        Self {
            detected: true,
            confidence: found.confidence,
            vehicle_type: title_case(&found.label),
            ..Self::no_vehicle()
        }
    }
}

fn title_case(label: &str) -> String {
    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn is_vehicle(object: &ObjectDetection) -> bool {
    object.confidence > VEHICLE_CONFIDENCE
        && VEHICLE_LABELS.iter().any(|label| object.label.eq_ignore_ascii_case(label))
}

pub struct ImageScanner {
    session: Arc<DetectionSession>,
    settings: LoopSettings,
    gate_name: String,
    registry: Arc<dyn VehicleRegistry>,
    access_log: Arc<dyn AccessLogStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl ImageScanner {
    pub fn new(
        session: Arc<DetectionSession>,
        settings: LoopSettings,
        gate_name: String,
        registry: Arc<dyn VehicleRegistry>,
        access_log: Arc<dyn AccessLogStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { session, settings, gate_name, registry, access_log, clock, metrics }
    }

    pub async fn scan(&self, frame: &Frame) -> ImageScan {
        let Some(detector) = self.session.detector().await else {
            return ImageScan::unavailable("Vehicle detector not configured");
        };
        let objects = match detector.detect(frame).await {
            Ok(objects) => objects,
            Err(e) => {
                self.metrics.record_detector_error();
                warn!(error = %format!("{:#}", e), "upload_detector_failed");
                return ImageScan::unavailable("Vehicle detector failed");
            }
        };
        let Some(found) = objects.iter().find(|o| is_vehicle(o)) else {
            return ImageScan::no_vehicle();
        };
        let mut scan = ImageScan::vehicle(found);

        let Some(reader) = self.session.reader().await else {
            return scan;
        };
        let fragments = match reader.read_text(frame).await {
            Ok(fragments) => fragments,
            Err(e) => {
                self.metrics.record_reader_error();
                warn!(error = %format!("{:#}", e), "upload_reader_failed");
                scan.plate_number = PLATE_READ_ERROR.to_string();
                return scan;
            }
        };
        let Some((token, _)) = self.settings.plates(fragments).into_iter().next() else {
            return scan;
        };
        scan.plate_number = token.to_string();
        self.metrics.record_plate_seen();

        let vehicle = match self.registry.find_by_plate(&PlatePattern::new(&token)).await {
            Ok(vehicle) => vehicle,
            Err(e) => {
                self.metrics.record_store_error();
                warn!(plate = %token, error = %format!("{:#}", e), "upload_registry_lookup_failed");
                scan.access_status = STATUS_STORE_ERROR.to_string();
                return scan;
            }
        };
        let decision = decide(vehicle.as_ref());

        let entry = AccessLogEntry {
            plate_detected: token.to_string(),
            vehicle_id: vehicle.as_ref().map(|v| v.id.clone()),
            action: AccessAction::Entry,
            status: decision.status_str().to_string(),
            denial_reason: decision.denial_reason(),
            gate: self.gate_name.clone(),
            timestamp: self.clock.now(),
            image_url: None,
        };
        match self.access_log.append(&entry).await {
            Ok(id) => {
                self.metrics.record_event_logged(decision.is_granted());
                info!(
                    id = %id,
                    plate = %token,
                    vehicle_type = %scan.vehicle_type,
                    status = %decision.status_label(),
                    "upload_scan_logged"
                );
                scan.access_granted = decision.is_granted();
                scan.access_status = decision.status_label();
            }
            Err(e) => {
                self.metrics.record_store_error();
                warn!(plate = %token, error = %format!("{:#}", e), "upload_access_log_write_failed");
                scan.access_status = STATUS_STORE_ERROR.to_string();
            }
        }
        scan.vehicle_info = vehicle;
        scan
    }
}
