//! IO modules - external system interfaces
//!
//! - `frames` - Frame source, JPEG encoding, overlays, captures
//! - `inference` - Object detector and text reader HTTP clients
//! - `registry` - Vehicle registry lookup
//! - `access_log` - Access log persistence
//! - `notifications` - In-app notification records
//! - `sms` - SMS gateway client
//! - `http` - Live feed, latest scan, captures and metrics endpoints

pub mod access_log;
pub mod frames;
pub mod http;
pub mod inference;
pub mod notifications;
pub mod registry;
pub mod sms;

// Re-export commonly used types
pub use access_log::{AccessLogStore, JsonlAccessLog, MemoryAccessLog};
pub use frames::{CaptureWriter, DirectoryFrameSource, FrameSource};
pub use http::{start_http_server, HttpState};
pub use inference::{Detector, HttpDetector, HttpTextReader, TextReader};
pub use notifications::{JsonlNotificationSink, MemoryNotificationSink, NotificationSink};
pub use registry::{FileVehicleRegistry, MemoryRegistry, VehicleRegistry};
pub use sms::{HttpSmsGateway, SmsGateway};
