//! HTTP surface: live feed, latest scan, captures, metrics
//!
//! Endpoints:
//! - `GET /live-feed` - multipart/x-mixed-replace JPEG stream, boundary `frame`
//! - `GET /latest-scan` - most recent logged decision as JSON
//! - `POST /detect` - one-shot scan of an uploaded image (multipart field `file`)
//! - `GET /captures/<file>` - saved plate captures
//! - `GET /metrics` - Prometheus text format
//! - `GET /health`

use crate::infra::metrics::{Metrics, MetricsTotals, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::io::frames::{is_capture_file_name, CAPTURES_URL_PREFIX};
use crate::services::feed::{FeedSubscriber, StreamPart};
use crate::services::latest_scan::LatestScanReader;
use crate::services::scanner::ImageScanner;
use anyhow::{bail, Context};
use bytes::{BufMut, Bytes, BytesMut};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, Limited, StreamBody};
use hyper::body::Frame as BodyFrame;
use hyper::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, error, info};

type HttpBody = BoxBody<Bytes, Infallible>;

/// Multipart boundary for the live feed
pub const FEED_BOUNDARY: &str = "frame";

/// Parts buffered per viewer connection
const VIEWER_QUEUE: usize = 2;

/// Largest accepted upload for `/detect`
pub const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Shared state for request handlers
#[derive(Clone)]
pub struct HttpState {
    pub site_id: Arc<String>,
    pub metrics: Arc<Metrics>,
    pub latest: LatestScanReader,
    pub feed: FeedSubscriber,
    pub captures_dir: Option<PathBuf>,
    /// None disables `/detect`
    pub scanner: Option<Arc<ImageScanner>>,
}

fn full(body: impl Into<Bytes>) -> HttpBody {
    Full::new(body.into()).boxed()
}

fn text_response(status: StatusCode, body: &'static str) -> Response<HttpBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full(body))
        .expect("static response should not fail")
}

/// Encode one multipart part of the live feed
pub fn encode_part(part: &StreamPart) -> Bytes {
    let (content_type, payload): (&str, &[u8]) = match part {
        StreamPart::Frame(jpeg) => ("image/jpeg", jpeg),
        StreamPart::Unavailable(reason) => ("text/plain", reason.as_bytes()),
    };
    let mut buf = BytesMut::with_capacity(payload.len() + 64);
    buf.put_slice(b"--");
    buf.put_slice(FEED_BOUNDARY.as_bytes());
    buf.put_slice(b"\r\nContent-Type: ");
    buf.put_slice(content_type.as_bytes());
    buf.put_slice(b"\r\n\r\n");
    buf.put_slice(payload);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

fn live_feed(state: &HttpState) -> Response<HttpBody> {
    let mut viewer = state.feed.subscribe();
    let (tx, rx) = mpsc::channel::<Bytes>(VIEWER_QUEUE);
    let metrics = state.metrics.clone();

    tokio::spawn(async move {
        metrics.viewer_connected();
        debug!("feed_viewer_connected");
        while let Some(part) = viewer.next().await {
            if tx.send(encode_part(&part)).await.is_err() {
                break;
            }
        }
        metrics.viewer_disconnected();
        debug!("feed_viewer_disconnected");
    });

    let stream = ReceiverStream::new(rx).map(|part| Ok::<_, Infallible>(BodyFrame::data(part)));
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, format!("multipart/x-mixed-replace; boundary={FEED_BOUNDARY}"))
        .header(CACHE_CONTROL, "no-cache")
        .body(BodyExt::boxed(StreamBody::new(stream)))
        .expect("static response should not fail")
}

/// Body for `/latest-scan`
pub fn latest_scan_json(latest: &LatestScanReader) -> String {
    let Some(scan) = latest.snapshot() else {
        return r#"{"detected":false}"#.to_string();
    };
    let mut value = match serde_json::to_value(&*scan) {
        Ok(value) => value,
        Err(e) => {
            error!(error = %e, "latest_scan_serialize_failed");
            return r#"{"detected":false}"#.to_string();
        }
    };
    if let Some(obj) = value.as_object_mut() {
        obj.insert("detected".to_string(), serde_json::Value::Bool(true));
    }
    value.to_string()
}

async fn capture(state: &HttpState, name: &str) -> Response<HttpBody> {
    let Some(dir) = &state.captures_dir else {
        return text_response(StatusCode::NOT_FOUND, "Not Found");
    };
    if !is_capture_file_name(name) {
        return text_response(StatusCode::NOT_FOUND, "Not Found");
    }
    match tokio::fs::read(dir.join(name)).await {
        Ok(jpeg) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "image/jpeg")
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .body(full(jpeg))
            .expect("static response should not fail"),
        Err(_) => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

/// Image bytes from a multipart form (field `file`) or a raw image body
async fn upload_image(content_type: Option<&str>, body: Bytes) -> anyhow::Result<Bytes> {
    let content_type = content_type.unwrap_or_default();
    if content_type.starts_with("image/") {
        return Ok(body);
    }
    let boundary =
        multer::parse_boundary(content_type).context("Expected multipart/form-data or image body")?;
    let mut multipart = multer::Multipart::new(tokio_stream::once(Ok::<_, Infallible>(body)), boundary);
    while let Some(field) = multipart.next_field().await.context("Malformed multipart body")? {
        if field.name() == Some("file") {
            return field.bytes().await.context("Failed to read upload");
        }
    }
    bail!("Missing form field `file`")
}

fn json_response(status: StatusCode, body: String) -> Response<HttpBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(full(body))
        .expect("static response should not fail")
}

fn error_json(status: StatusCode, detail: &str) -> Response<HttpBody> {
    json_response(status, serde_json::json!({ "detail": detail }).to_string())
}

/// Handle `POST /detect` with an already collected body
pub async fn detect_upload(
    state: &HttpState,
    content_type: Option<&str>,
    body: Bytes,
) -> Response<HttpBody> {
    let Some(scanner) = &state.scanner else {
        return error_json(StatusCode::SERVICE_UNAVAILABLE, "Detection is not enabled");
    };
    let image = match upload_image(content_type, body).await {
        Ok(image) => image,
        Err(e) => return error_json(StatusCode::BAD_REQUEST, &format!("{:#}", e)),
    };
    let decoded =
        tokio::task::spawn_blocking(move || image::load_from_memory(&image).map(|img| img.to_rgb8())).await;
    let frame = match decoded {
        Ok(Ok(frame)) => frame,
        Ok(Err(e)) => return error_json(StatusCode::BAD_REQUEST, &format!("Invalid image: {}", e)),
        Err(e) => {
            error!(error = %e, "upload_decode_task_failed");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Image decode failed");
        }
    };

    let scan = scanner.scan(&frame).await;
    match serde_json::to_string(&scan) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "upload_scan_serialize_failed");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Serialization failed")
        }
    }
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    sum: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {cumulative}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site: &str) -> String {
    let t: MetricsTotals = metrics.totals();
    let mut output = String::with_capacity(4096);

    let counters: [(&str, &str, u64); 17] = [
        ("gate_frames_total", "Frames read from the camera", t.frames_total),
        ("gate_encode_errors_total", "Frames that failed JPEG encoding", t.encode_errors),
        ("gate_detection_cycles_total", "Detection cycles run", t.cycles_total),
        ("gate_detector_errors_total", "Object detector failures", t.detector_errors),
        ("gate_reader_errors_total", "Text reader failures", t.reader_errors),
        ("gate_plates_seen_total", "Accepted plate candidates", t.plates_seen),
        ("gate_access_granted_total", "Logged granted decisions", t.events_granted),
        ("gate_access_denied_total", "Logged denied decisions", t.events_denied),
        ("gate_suppressed_cooldown_total", "Plates suppressed by cooldown", t.suppressed_cooldown),
        ("gate_suppressed_dwell_total", "Plates suppressed after a recent entry", t.suppressed_dwell),
        ("gate_store_errors_total", "Registry or access log failures", t.store_errors),
        ("gate_capture_errors_total", "Capture save failures", t.capture_errors),
        ("gate_notifications_dispatched_total", "Owner notices queued", t.notifications_dispatched),
        ("gate_notifications_dropped_total", "Owner notices dropped", t.notifications_dropped),
        ("gate_sms_sent_total", "SMS messages delivered", t.sms_sent),
        ("gate_sms_failed_total", "SMS delivery failures", t.sms_failed),
        ("gate_inapp_failed_total", "In-app notification failures", t.inapp_failed),
    ];
    for (name, help, val) in counters {
        write_metric(&mut output, name, help, MetricType::Counter, site, val);
    }

    write_metric(&mut output, "gate_feed_viewers", "Connected live feed viewers", MetricType::Gauge, site, t.viewers);

    write_histogram(
        &mut output,
        "gate_cycle_latency_ms",
        "Detection cycle latency in milliseconds",
        site,
        &t.cycle_latency_buckets,
        t.cycle_latency_sum_ms,
    );

    output
}

/// Route a request to its handler
pub async fn route(method: &Method, path: &str, state: &HttpState) -> Response<HttpBody> {
    if let Some(name) = path.strip_prefix(CAPTURES_URL_PREFIX).and_then(|p| p.strip_prefix('/')) {
        return match *method {
            Method::GET => capture(state, name).await,
            _ => text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed"),
        };
    }

    match (method, path) {
        (&Method::GET, "/live-feed") => live_feed(state),
        (&Method::GET, "/latest-scan") => json_response(StatusCode::OK, latest_scan_json(&state.latest)),
        (&Method::GET, "/metrics") => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
            .body(full(format_prometheus_metrics(&state.metrics, &state.site_id)))
            .expect("static response should not fail"),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        // CORS preflight for the browser-facing endpoints
        (&Method::OPTIONS, "/latest-scan" | "/live-feed" | "/detect") => Response::builder()
            .status(StatusCode::OK)
            .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
            .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(full(Bytes::new()))
            .expect("static response should not fail"),
        (&Method::POST, "/detect") => detect_upload(state, None, Bytes::new()).await,
        (_, "/live-feed" | "/latest-scan" | "/detect" | "/metrics" | "/health") => {
            text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
        }
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    }
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<HttpState>,
) -> Result<Response<HttpBody>, Infallible> {
    if req.method() != Method::POST || req.uri().path() != "/detect" {
        return Ok(route(req.method(), req.uri().path(), &state).await);
    }

    let content_type = req.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string);
    let body = match Limited::new(req.into_body(), MAX_UPLOAD_BYTES).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(error = %e, "upload_body_rejected");
            return Ok(error_json(StatusCode::PAYLOAD_TOO_LARGE, "Upload too large or interrupted"));
        }
    };
    Ok(detect_upload(&state, content_type.as_deref(), body).await)
}

/// Serve HTTP until shutdown is signalled
pub async fn start_http_server(
    addr: SocketAddr,
    state: HttpState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    let state = Arc::new(state);

    info!(addr = %addr, site = %state.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _peer)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                debug!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
