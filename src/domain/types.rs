//! Shared types for the gate access pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Decoded camera frame
pub type Frame = image::RgbImage;

/// Newtype wrapper for registry vehicle IDs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(pub String);

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(s: &str) -> Self {
        VehicleId(s.to_string())
    }
}

/// Registration status of a vehicle as stored in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VehicleStatus {
    Active,
    Pending,
    Blacklisted,
    Unknown,
}

impl std::str::FromStr for VehicleStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => VehicleStatus::Active,
            "PENDING" => VehicleStatus::Pending,
            "BLACKLISTED" => VehicleStatus::Blacklisted,
            _ => VehicleStatus::Unknown,
        })
    }
}

impl From<String> for VehicleStatus {
    fn from(s: String) -> Self {
        s.parse().unwrap_or(VehicleStatus::Unknown)
    }
}

impl From<VehicleStatus> for String {
    fn from(status: VehicleStatus) -> Self {
        status.as_str().to_string()
    }
}

impl VehicleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Active => "ACTIVE",
            VehicleStatus::Pending => "PENDING",
            VehicleStatus::Blacklisted => "BLACKLISTED",
            VehicleStatus::Unknown => "UNKNOWN",
        }
    }
}

/// Registry record for a known vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub plate_number: String,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub owner_name: Option<String>,
    #[serde(default)]
    pub owner_phone: Option<String>,
    pub status: VehicleStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessAction {
    Entry,
    Exit,
}

impl AccessAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAction::Entry => "Entry",
            AccessAction::Exit => "Exit",
        }
    }

    /// Past-tense verb used in owner notifications
    pub fn verb(&self) -> &'static str {
        match self {
            AccessAction::Entry => "entered",
            AccessAction::Exit => "exited",
        }
    }
}

impl std::fmt::Display for AccessAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    Pending,
    Blacklisted,
    Unregistered,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::Pending => "PENDING",
            DenialReason::Blacklisted => "BLACKLISTED",
            DenialReason::Unregistered => "UNREGISTERED",
        }
    }
}

/// Outcome of evaluating a vehicle's registration status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Denied(Option<DenialReason>),
}

impl AccessDecision {
    #[inline]
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessDecision::Granted)
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            AccessDecision::Granted => "GRANTED",
            AccessDecision::Denied(_) => "DENIED",
        }
    }

    /// Status shown to pollers, e.g. `DENIED (BLACKLISTED)`
    pub fn status_label(&self) -> String {
        match self {
            AccessDecision::Denied(Some(reason)) => format!("DENIED ({})", reason.as_str()),
            _ => self.status_str().to_string(),
        }
    }

    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            AccessDecision::Granted => None,
            AccessDecision::Denied(reason) => *reason,
        }
    }
}

/// Persisted access event, one per logged plate sighting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub plate_detected: String,
    #[serde(default)]
    pub vehicle_id: Option<VehicleId>,
    pub action: AccessAction,
    /// "GRANTED" or "DENIED"
    pub status: String,
    #[serde(default)]
    pub denial_reason: Option<DenialReason>,
    pub gate: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Access log entry together with the ID the store assigned to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAccessLog {
    pub id: String,
    #[serde(flatten)]
    pub entry: AccessLogEntry,
}

/// Axis-aligned box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1: x1.min(x2), y1: y1.min(y2), x2: x1.max(x2), y2: y1.max(y2) }
    }

    #[inline]
    pub fn center_y(&self) -> f32 {
        (self.y1 + self.y2) / 2.0
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Smallest box containing both boxes
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
            x2: self.x2.max(other.x2),
            y2: self.y2.max(other.y2),
        }
    }
}

/// One piece of recognized text from the text reader
#[derive(Debug, Clone, PartialEq)]
pub struct TextFragment {
    pub bounds: BoundingBox,
    pub text: String,
    pub confidence: f32,
}

/// One object found by the detector
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDetection {
    pub label: String,
    pub bounds: BoundingBox,
    pub confidence: f32,
}

/// Most recent logged decision, served to polling clients.
///
/// Pollers compare `timestamp` numerically to spot a new scan, so it goes out
/// as fractional epoch seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub id: String,
    #[serde(serialize_with = "epoch_seconds")]
    pub timestamp: DateTime<Utc>,
    pub plate_number: String,
    pub action: AccessAction,
    pub access_granted: bool,
    pub access_status: String,
    #[serde(rename = "vehicle_info")]
    pub vehicle: Option<Vehicle>,
    pub image_url: Option<String>,
}

fn epoch_seconds<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(at.timestamp_millis() as f64 / 1000.0)
}

/// Generate a time-ordered unique identifier
pub fn new_uuid_v7() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_status_from_str() {
        assert_eq!("ACTIVE".parse::<VehicleStatus>().unwrap(), VehicleStatus::Active);
        assert_eq!(" pending ".parse::<VehicleStatus>().unwrap(), VehicleStatus::Pending);
        assert_eq!("Blacklisted".parse::<VehicleStatus>().unwrap(), VehicleStatus::Blacklisted);
        assert_eq!("suspended".parse::<VehicleStatus>().unwrap(), VehicleStatus::Unknown);
    }

    #[test]
    fn test_vehicle_deserializes_loose_status() {
        let json = r#"{"id":"v1","plate_number":"ABC 123","status":"active "}"#;
        let vehicle: Vehicle = serde_json::from_str(json).unwrap();
        assert_eq!(vehicle.status, VehicleStatus::Active);
        assert_eq!(vehicle.owner_phone, None);

        let out = serde_json::to_value(&vehicle).unwrap();
        assert_eq!(out["status"], "ACTIVE");
    }

    #[test]
    fn test_bounding_box_union() {
        let a = BoundingBox::new(0.0, 10.0, 40.0, 30.0);
        let b = BoundingBox::new(50.0, 12.0, 90.0, 34.0);
        let u = a.union(&b);
        assert_eq!(u, BoundingBox::new(0.0, 10.0, 90.0, 34.0));
        assert_eq!(u.width(), 90.0);
        assert_eq!(a.center_y(), 20.0);
    }

    #[test]
    fn test_bounding_box_normalizes_corners() {
        let b = BoundingBox::new(40.0, 30.0, 0.0, 10.0);
        assert_eq!(b.x1, 0.0);
        assert_eq!(b.y2, 30.0);
    }

    #[test]
    fn test_stored_log_flattens_entry() {
        let stored = StoredAccessLog {
            id: "log-1".to_string(),
            entry: AccessLogEntry {
                plate_detected: "XYZ999".to_string(),
                vehicle_id: Some(VehicleId::from("v1")),
                action: AccessAction::Entry,
                status: "GRANTED".to_string(),
                denial_reason: None,
                gate: "Main Gate".to_string(),
                timestamp: DateTime::parse_from_rfc3339("2026-01-01T08:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
                image_url: None,
            },
        };
        let value = serde_json::to_value(&stored).unwrap();
        assert_eq!(value["id"], "log-1");
        assert_eq!(value["action"], "Entry");
        assert_eq!(value["vehicle_id"], "v1");
    }

    #[test]
    fn test_status_label_carries_reason() {
        assert_eq!(AccessDecision::Granted.status_label(), "GRANTED");
        assert_eq!(AccessDecision::Denied(Some(DenialReason::Pending)).status_label(), "DENIED (PENDING)");
        assert_eq!(AccessDecision::Denied(None).status_label(), "DENIED");
    }
}
