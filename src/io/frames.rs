//! Frame acquisition, JPEG encoding, overlays and plate captures
//!
//! `DirectoryFrameSource` replays still images from a directory at a fixed
//! rate and stands in for a camera driver behind the `FrameSource` trait.

use crate::domain::plate::PlateToken;
use crate::domain::types::{BoundingBox, Frame};
use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// JPEG quality for streamed frames and captures
pub const JPEG_QUALITY: u8 = 80;

/// URL prefix under which captures are served
pub const CAPTURES_URL_PREFIX: &str = "/captures";

const OVERLAY_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OVERLAY_THICKNESS: i32 = 2;

#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, or None at end of stream
    async fn read(&mut self) -> anyhow::Result<Option<Frame>>;
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

pub struct DirectoryFrameSource {
    files: Vec<PathBuf>,
    next: usize,
    loop_playback: bool,
    ticker: Interval,
}

impl DirectoryFrameSource {
    /// List the directory's images in name order; fails if there are none
    pub async fn open<P: AsRef<Path>>(dir: P, fps: u32, loop_playback: bool) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to open frames directory {}", dir.display()))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if is_image_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            bail!("no frames in {}", dir.display());
        }

        let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(dir = %dir.display(), frames = %files.len(), fps = %fps, "frame_source_opened");
        Ok(Self { files, next: 0, loop_playback, ticker })
    }
}

#[async_trait]
impl FrameSource for DirectoryFrameSource {
    async fn read(&mut self) -> anyhow::Result<Option<Frame>> {
        if self.next >= self.files.len() {
            if !self.loop_playback {
                return Ok(None);
            }
            self.next = 0;
        }

        self.ticker.tick().await;

        let path = self.files[self.next].clone();
        self.next += 1;

        let frame = tokio::task::spawn_blocking(move || {
            image::open(&path)
                .map(|img| img.to_rgb8())
                .with_context(|| format!("Failed to decode frame {}", path.display()))
        })
        .await
        .context("frame decode task failed")??;

        Ok(Some(frame))
    }
}

/// Encode a frame as JPEG
pub fn encode_jpeg(frame: &Frame, quality: u8) -> anyhow::Result<Bytes> {
    let mut buf = Vec::with_capacity((frame.width() * frame.height() / 4) as usize);
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(frame)
        .context("JPEG encode failed")?;
    Ok(Bytes::from(buf))
}

/// Clamp a box to the frame; None if nothing remains visible
fn clamp_rect(bounds: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    let x1 = bounds.x1.max(0.0).floor() as i32;
    let y1 = bounds.y1.max(0.0).floor() as i32;
    let x2 = bounds.x2.min(width as f32).ceil() as i32;
    let y2 = bounds.y2.min(height as f32).ceil() as i32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(Rect::at(x1, y1).of_size((x2 - x1) as u32, (y2 - y1) as u32))
}

/// Draw plate regions onto the frame as hollow rectangles
pub fn draw_overlays(frame: &mut Frame, overlays: &[BoundingBox]) {
    let (width, height) = frame.dimensions();
    for bounds in overlays {
        let Some(rect) = clamp_rect(bounds, width, height) else {
            continue;
        };
        for inset in 0..OVERLAY_THICKNESS {
            let w = rect.width() as i32 - 2 * inset;
            let h = rect.height() as i32 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let inner = Rect::at(rect.left() + inset, rect.top() + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(frame, inner, OVERLAY_COLOR);
        }
    }
}

/// Capture file names are generated here; anything else is rejected when served
pub fn is_capture_file_name(name: &str) -> bool {
    let Some(stem) = name.strip_prefix("capture_").and_then(|rest| rest.strip_suffix(".jpg")) else {
        return false;
    };
    let Some((millis, plate)) = stem.split_once('_') else {
        return false;
    };
    !millis.is_empty()
        && millis.chars().all(|c| c.is_ascii_digit())
        && !plate.is_empty()
        && plate.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Writes plate captures as `capture_<epoch_millis>_<PLATE>.jpg`
#[derive(Debug, Clone)]
pub struct CaptureWriter {
    dir: PathBuf,
}

impl CaptureWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Save the frame and return the URL it is served under
    pub async fn save(
        &self,
        frame: &Frame,
        at: DateTime<Utc>,
        plate: &PlateToken,
    ) -> anyhow::Result<String> {
        let name = format!("capture_{}_{}.jpg", at.timestamp_millis(), plate.bare());
        let jpeg = encode_jpeg(frame, JPEG_QUALITY)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create captures directory {}", self.dir.display()))?;
        let path = self.dir.join(&name);
        tokio::fs::write(&path, &jpeg)
            .await
            .with_context(|| format!("Failed to write capture {}", path.display()))?;

        debug!(path = %path.display(), bytes = %jpeg.len(), "capture_saved");
        Ok(format!("{}/{}", CAPTURES_URL_PREFIX, name))
    }

    /// Remove a capture whose access log entry was never written
    pub async fn discard(&self, url: &str) -> anyhow::Result<()> {
        let Some(name) = url
            .strip_prefix(CAPTURES_URL_PREFIX)
            .and_then(|p| p.strip_prefix('/'))
            .filter(|name| is_capture_file_name(name))
        else {
            bail!("Not a capture URL: {}", url);
        };
        let path = self.dir.join(name);
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to remove capture {}", path.display()))
    }
}
