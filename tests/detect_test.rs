//! Integration tests for one-shot scans of uploaded images

mod common;

use bytes::Bytes;
use common::{blank_frame, fragment, object, registry, ScriptedDetector, ScriptedProvider, ScriptedReader};
use gate_access::domain::{AccessAction, DenialReason, ManualClock, VehicleId};
use gate_access::infra::Metrics;
use gate_access::io::frames::{encode_jpeg, JPEG_QUALITY};
use gate_access::io::http::detect_upload;
use gate_access::io::{HttpState, MemoryAccessLog, TextReader};
use gate_access::services::{
    feed_channel, latest_scan_channel, DetectionSession, ImageScanner, LoopSettings,
};
use http_body_util::BodyExt;
use hyper::StatusCode;
use std::sync::Arc;

struct Harness {
    scanner: Arc<ImageScanner>,
    log: Arc<MemoryAccessLog>,
    metrics: Arc<Metrics>,
}

fn harness(objects: Vec<gate_access::domain::ObjectDetection>, reader: ScriptedReader) -> Harness {
    let provider = ScriptedProvider::new(None, Arc::new(reader) as Arc<dyn TextReader>)
        .with_detector(Arc::new(ScriptedDetector(objects)));
    let log = Arc::new(MemoryAccessLog::new());
    let metrics = Arc::new(Metrics::new());
    let scanner = Arc::new(ImageScanner::new(
        Arc::new(DetectionSession::new(Arc::new(provider))),
        LoopSettings::default(),
        "Main Gate".to_string(),
        registry(),
        log.clone(),
        Arc::new(ManualClock::new(common::t0())),
        metrics.clone(),
    ));
    Harness { scanner, log, metrics }
}

fn plate_reader(text: &str) -> ScriptedReader {
    ScriptedReader::constant(vec![fragment(text, 100.0, 80.0)])
}

#[tokio::test]
async fn test_registered_vehicle_is_granted_and_logged_as_entry() {
    let h = harness(vec![object("person", 0.95), object("car", 0.87)], plate_reader("XYZ 999"));

    let scan = h.scanner.scan(&blank_frame()).await;
    assert_eq!(scan.status, "success");
    assert!(scan.detected);
    assert_eq!(scan.vehicle_type, "Car");
    assert_eq!(scan.confidence, 0.87);
    assert_eq!(scan.plate_number, "XYZ999");
    assert!(scan.access_granted);
    assert_eq!(scan.access_status, "GRANTED");
    assert_eq!(scan.vehicle_info.as_ref().map(|v| v.id.clone()), Some(VehicleId::from("veh-1")));

    let entries = h.log.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry.action, AccessAction::Entry);
    assert_eq!(entries[0].entry.timestamp, common::t0());
    assert_eq!(h.metrics.totals().events_granted, 1);
}

#[tokio::test]
async fn test_repeat_upload_logs_again() {
    let h = harness(vec![object("car", 0.9)], plate_reader("XYZ999"));
    h.scanner.scan(&blank_frame()).await;
    h.scanner.scan(&blank_frame()).await;
    assert_eq!(h.log.len(), 2);
}

#[tokio::test]
async fn test_blacklisted_and_unregistered_carry_reason() {
    let h = harness(vec![object("truck", 0.7)], plate_reader("BLK777"));
    let scan = h.scanner.scan(&blank_frame()).await;
    assert!(!scan.access_granted);
    assert_eq!(scan.access_status, "DENIED (BLACKLISTED)");
    assert_eq!(h.log.entries()[0].entry.denial_reason, Some(DenialReason::Blacklisted));

    let h = harness(vec![object("truck", 0.7)], plate_reader("QQQ 4321"));
    let scan = h.scanner.scan(&blank_frame()).await;
    assert_eq!(scan.access_status, "DENIED (UNREGISTERED)");
    assert!(scan.vehicle_info.is_none());
    assert_eq!(h.log.entries()[0].entry.vehicle_id, None);
}

#[tokio::test]
async fn test_no_vehicle_means_no_read_and_no_log() {
    let reader = plate_reader("XYZ999");
    let h = harness(vec![object("person", 0.99), object("car", 0.4)], reader);

    let scan = h.scanner.scan(&blank_frame()).await;
    assert!(!scan.detected);
    assert_eq!(scan.plate_number, "Not Detected");
    assert_eq!(scan.vehicle_type, "None");
    assert!(h.log.is_empty());
}

#[tokio::test]
async fn test_vehicle_without_readable_plate_is_not_logged() {
    let h = harness(vec![object("motorcycle", 0.8)], plate_reader("AB"));
    let scan = h.scanner.scan(&blank_frame()).await;
    assert!(scan.detected);
    assert_eq!(scan.vehicle_type, "Motorcycle");
    assert_eq!(scan.plate_number, "Not Detected");
    assert_eq!(scan.access_status, "DENIED");
    assert!(h.log.is_empty());
}

#[tokio::test]
async fn test_detect_endpoint_accepts_multipart_upload() {
    let h = harness(vec![object("car", 0.9)], plate_reader("XYZ999"));
    let (_latest_tx, latest) = latest_scan_channel();
    let (_feed_tx, feed) = feed_channel(4);
    let state = HttpState {
        site_id: Arc::new("test".to_string()),
        metrics: h.metrics.clone(),
        latest,
        feed,
        captures_dir: None,
        scanner: Some(h.scanner.clone()),
    };

    let jpeg = encode_jpeg(&blank_frame(), JPEG_QUALITY).unwrap();
    let mut body = Vec::new();
    body.extend_from_slice(
        b"--gate\r\nContent-Disposition: form-data; name=\"file\"; filename=\"car.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n",
    );
    body.extend_from_slice(&jpeg);
    body.extend_from_slice(b"\r\n--gate--\r\n");

    let response = detect_upload(&state, Some("multipart/form-data; boundary=gate"), Bytes::from(body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["detected"], true);
    assert_eq!(json["vehicle_type"], "Car");
    assert_eq!(json["plate_number"], "XYZ999");
    assert_eq!(json["access_granted"], true);
    assert_eq!(json["vehicle_info"]["id"], "veh-1");
    assert_eq!(h.log.len(), 1);

    let response = detect_upload(&state, Some("image/jpeg"), Bytes::from_static(b"not an image")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.log.len(), 1);
}
