//! Live feed fan-out
//!
//! The detection loop publishes each encoded frame once; every connected
//! viewer receives it through a broadcast channel. Viewers that fall behind
//! skip ahead. When the loop stops, viewers get one text part describing why
//! and then the stream ends.

use bytes::Bytes;
use tokio::sync::{broadcast, watch};
use tracing::debug;

/// Frames buffered per viewer before it starts skipping
pub const FEED_BUFFER_FRAMES: usize = 8;

pub const CAMERA_UNAVAILABLE: &str = "Camera not available";
pub const STREAM_ENDED: &str = "Stream ended";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedState {
    Starting,
    Live,
    Ended(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPart {
    /// JPEG-encoded frame
    Frame(Bytes),
    /// Diagnostic text sent once before the stream ends
    Unavailable(String),
}

pub struct FeedPublisher {
    frames: broadcast::Sender<Bytes>,
    state: watch::Sender<FeedState>,
}

#[derive(Clone)]
pub struct FeedSubscriber {
    frames: broadcast::Sender<Bytes>,
    state: watch::Receiver<FeedState>,
}

pub fn feed_channel(capacity: usize) -> (FeedPublisher, FeedSubscriber) {
    let (frames, _) = broadcast::channel(capacity.max(1));
    let (state_tx, state_rx) = watch::channel(FeedState::Starting);
    (
        FeedPublisher { frames: frames.clone(), state: state_tx },
        FeedSubscriber { frames, state: state_rx },
    )
}

impl FeedPublisher {
    /// Send a frame to current viewers; returns how many received it
    pub fn publish(&self, jpeg: Bytes) -> usize {
        if *self.state.borrow() == FeedState::Starting {
            self.state.send_replace(FeedState::Live);
        }
        self.frames.send(jpeg).unwrap_or(0)
    }

    /// Mark the feed finished; later and current viewers get `reason`
    pub fn end(&self, reason: &str) {
        self.state.send_replace(FeedState::Ended(reason.to_string()));
    }
}

impl Drop for FeedPublisher {
    fn drop(&mut self) {
        if !matches!(*self.state.borrow(), FeedState::Ended(_)) {
            self.state.send_replace(FeedState::Ended(STREAM_ENDED.to_string()));
        }
    }
}

impl FeedSubscriber {
    pub fn state(&self) -> FeedState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> FeedViewer {
        FeedViewer { frames: self.frames.subscribe(), state: self.state.clone(), finished: false }
    }
}

pub struct FeedViewer {
    frames: broadcast::Receiver<Bytes>,
    state: watch::Receiver<FeedState>,
    finished: bool,
}

impl FeedViewer {
    fn finish(&mut self) -> Option<StreamPart> {
        if self.finished {
            return None;
        }
        self.finished = true;
        let reason = match &*self.state.borrow() {
            FeedState::Ended(reason) => reason.clone(),
            _ => STREAM_ENDED.to_string(),
        };
        Some(StreamPart::Unavailable(reason))
    }

    /// Next part for this viewer; None once the stream is over
    pub async fn next(&mut self) -> Option<StreamPart> {
        if self.finished {
            return None;
        }
        loop {
            if matches!(*self.state.borrow_and_update(), FeedState::Ended(_)) {
                // Deliver frames already buffered before the end marker
                return match self.frames.try_recv() {
                    Ok(jpeg) => Some(StreamPart::Frame(jpeg)),
                    Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                    Err(_) => self.finish(),
                };
            }

            tokio::select! {
                biased;
                received = self.frames.recv() => match received {
                    Ok(jpeg) => return Some(StreamPart::Frame(jpeg)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped = %skipped, "feed_viewer_lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => return self.finish(),
                },
                changed = self.state.changed() => {
                    if changed.is_err() {
                        return self.finish();
                    }
                }
            }
        }
    }
}
