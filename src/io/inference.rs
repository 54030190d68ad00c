//! Object detector and text reader clients
//!
//! Both models run out of process behind HTTP endpoints. Each request posts
//! the JPEG-encoded frame as multipart field `image` and receives JSON.
//! Boxes may be `[x1, y1, x2, y2]` or a list of corner points.

use crate::domain::types::{BoundingBox, Frame, ObjectDetection, TextFragment};
use crate::io::frames::{encode_jpeg, JPEG_QUALITY};
use anyhow::{bail, Context};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<ObjectDetection>>;
}

#[async_trait]
pub trait TextReader: Send + Sync {
    async fn read_text(&self, frame: &Frame) -> anyhow::Result<Vec<TextFragment>>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireBox {
    Corners([f32; 4]),
    Polygon(Vec<[f32; 2]>),
}

impl WireBox {
    fn to_bounds(&self) -> Option<BoundingBox> {
        match self {
            WireBox::Corners([x1, y1, x2, y2]) => Some(BoundingBox::new(*x1, *y1, *x2, *y2)),
            WireBox::Polygon(points) => {
                let first = points.first()?;
                let init = BoundingBox::new(first[0], first[1], first[0], first[1]);
                Some(points.iter().fold(init, |acc, p| {
                    acc.union(&BoundingBox::new(p[0], p[1], p[0], p[1]))
                }))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    #[serde(default)]
    label: String,
    confidence: f32,
    #[serde(rename = "box")]
    bounds: WireBox,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireText {
    text: String,
    confidence: f32,
    #[serde(rename = "box")]
    bounds: WireBox,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    #[serde(default)]
    texts: Vec<WireText>,
}

fn parse_detections(body: &str) -> anyhow::Result<Vec<ObjectDetection>> {
    let response: DetectResponse = serde_json::from_str(body).context("invalid detector response")?;
    Ok(response
        .detections
        .into_iter()
        .filter_map(|d| {
            let bounds = d.bounds.to_bounds()?;
            Some(ObjectDetection { label: d.label, bounds, confidence: d.confidence })
        })
        .collect())
}

fn parse_texts(body: &str) -> anyhow::Result<Vec<TextFragment>> {
    let response: ReadResponse = serde_json::from_str(body).context("invalid reader response")?;
    Ok(response
        .texts
        .into_iter()
        .filter_map(|t| {
            let bounds = t.bounds.to_bounds()?;
            Some(TextFragment { bounds, text: t.text, confidence: t.confidence })
        })
        .collect())
}

/// Parse URL and extract basic auth credentials if present
fn parse_url_with_auth(url: &str) -> (String, Option<String>) {
    for scheme in ["http://", "https://"] {
        let Some(rest) = url.strip_prefix(scheme) else {
            continue;
        };
        let Some(at_pos) = rest.find('@') else {
            break;
        };
        let auth_part = &rest[..at_pos];
        let host_part = &rest[at_pos + 1..];
        if auth_part.contains(':') {
            let header = format!("Basic {}", STANDARD.encode(auth_part.as_bytes()));
            return (format!("{}{}", scheme, host_part), Some(header));
        }
        break;
    }
    (url.to_string(), None)
}

/// Shared HTTP plumbing for a model endpoint
struct ModelEndpoint {
    url: String,
    auth_header: Option<String>,
    client: reqwest::Client,
}

impl ModelEndpoint {
    fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let (url, auth_header) = parse_url_with_auth(url);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build inference HTTP client")?;
        Ok(Self { url, auth_header, client })
    }

    async fn post_frame(&self, frame: &Frame) -> anyhow::Result<String> {
        let jpeg = encode_jpeg(frame, JPEG_QUALITY)?;
        let part = Part::bytes(jpeg.to_vec())
            .file_name("frame.jpg")
            .mime_str("image/jpeg")
            .context("invalid mime type")?;
        let form = Form::new().part("image", part);

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(header) = &self.auth_header {
            request = request.header("Authorization", header);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("request to {} failed", self.url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{} returned {}", self.url, status.as_u16());
        }
        response.text().await.context("failed to read model response")
    }
}

pub struct HttpDetector {
    endpoint: ModelEndpoint,
}

impl HttpDetector {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self { endpoint: ModelEndpoint::new(url, timeout)? })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> anyhow::Result<Vec<ObjectDetection>> {
        let body = self.endpoint.post_frame(frame).await?;
        parse_detections(&body)
    }
}

pub struct HttpTextReader {
    endpoint: ModelEndpoint,
}

impl HttpTextReader {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self { endpoint: ModelEndpoint::new(url, timeout)? })
    }
}

#[async_trait]
impl TextReader for HttpTextReader {
    async fn read_text(&self, frame: &Frame) -> anyhow::Result<Vec<TextFragment>> {
        let body = self.endpoint.post_frame(frame).await?;
        parse_texts(&body)
    }
}
