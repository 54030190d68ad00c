//! Domain models - core access types and plate handling
//!
//! This module contains the canonical data types used throughout the system:
//! - `Vehicle` / `VehicleStatus` - registry records
//! - `AccessLogEntry` - persisted entry/exit events
//! - `PlateToken` / `PlatePattern` - normalized OCR text and fuzzy matching
//! - `Clock` - injectable wall-clock source

pub mod clock;
pub mod plate;
pub mod types;

// Re-export commonly used types at module level
pub use clock::{Clock, ManualClock, SystemClock};
pub use plate::{normalize, NormalizeError, PlatePattern, PlateToken};
pub use types::{
    AccessAction, AccessDecision, AccessLogEntry, BoundingBox, DenialReason, Frame,
    ObjectDetection, ScanResult, StoredAccessLog, TextFragment, Vehicle, VehicleId, VehicleStatus,
};
