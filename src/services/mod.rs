//! Services - detection and access decision logic
//!
//! - `detection_loop` - Frame pull, periodic detection, live feed publish
//! - `grouping` - OCR fragment grouping into plate candidates
//! - `pipeline` - Per-plate access decision pipeline
//! - `access` - Entry/exit state machine and registration decision
//! - `cooldown` - Same-token suppression window
//! - `notifier` - Owner notification queue and worker
//! - `session` - Lazily opened camera and model handles
//! - `scanner` - One-shot scan of an uploaded image
//! - `feed` - Live feed fan-out to viewers
//! - `latest_scan` - Most recent logged decision

pub mod access;
pub mod cooldown;
pub mod detection_loop;
pub mod feed;
pub mod grouping;
pub mod latest_scan;
pub mod notifier;
pub mod pipeline;
pub mod scanner;
pub mod session;

// Re-export commonly used types
pub use detection_loop::{DetectionLoop, LoopExit, LoopSettings};
pub use feed::{feed_channel, FeedPublisher, FeedSubscriber, FEED_BUFFER_FRAMES};
pub use latest_scan::{latest_scan_channel, LatestScan, LatestScanReader};
pub use notifier::{create_notifier, NoticeText, NotificationDispatcher, NotificationWorker};
pub use pipeline::{AccessPipeline, PipelineDeps, PipelineSettings, PlateOutcome};
pub use scanner::{ImageScan, ImageScanner};
pub use session::{ConfigSessionProvider, DetectionSession, SessionProvider};
