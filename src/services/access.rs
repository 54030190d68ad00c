//! Per-vehicle entry/exit state machine
//!
//! The action for a sighting is derived from the vehicle's most recent log
//! entry. An Entry followed by another sighting inside the dwell threshold is
//! the same visit and is suppressed; after the threshold it becomes an Exit.

use crate::domain::types::{
    AccessAction, AccessDecision, AccessLogEntry, DenialReason, Vehicle, VehicleStatus,
};
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Log this sighting
    Proceed { action: AccessAction, decision: AccessDecision },
    /// Vehicle entered too recently
    Suppressed { since_entry: Duration },
}

/// Access decision for a vehicle's registration status
pub fn decide(vehicle: Option<&Vehicle>) -> AccessDecision {
    let Some(vehicle) = vehicle else {
        return AccessDecision::Denied(Some(DenialReason::Unregistered));
    };
    match vehicle.status {
        VehicleStatus::Active => AccessDecision::Granted,
        VehicleStatus::Pending => AccessDecision::Denied(Some(DenialReason::Pending)),
        VehicleStatus::Blacklisted => AccessDecision::Denied(Some(DenialReason::Blacklisted)),
        VehicleStatus::Unknown => AccessDecision::Denied(None),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AccessStateMachine {
    dwell: Duration,
}

impl AccessStateMachine {
    pub fn new(dwell: Duration) -> Self {
        Self { dwell }
    }

    /// Action implied by the vehicle's previous log entry
    pub fn next_action(&self, last: Option<&AccessLogEntry>, now: DateTime<Utc>) -> Result<AccessAction, Duration> {
        match last {
            Some(prev) if prev.action == AccessAction::Entry => {
                let since_entry = now - prev.timestamp;
                if since_entry > self.dwell {
                    Ok(AccessAction::Exit)
                } else {
                    Err(since_entry)
                }
            }
            _ => Ok(AccessAction::Entry),
        }
    }

    /// Full evaluation for one sighting; unregistered plates have no history
    pub fn evaluate(
        &self,
        vehicle: Option<&Vehicle>,
        last: Option<&AccessLogEntry>,
        now: DateTime<Utc>,
    ) -> AccessOutcome {
        let last = if vehicle.is_some() { last } else { None };
        match self.next_action(last, now) {
            Ok(action) => AccessOutcome::Proceed { action, decision: decide(vehicle) },
            Err(since_entry) => AccessOutcome::Suppressed { since_entry },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::VehicleId;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-04T09:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn vehicle(status: VehicleStatus) -> Vehicle {
        Vehicle {
            id: VehicleId::from("v1"),
            plate_number: "ABC123".to_string(),
            owner_id: Some("u1".to_string()),
            owner_name: None,
            owner_phone: None,
            status,
        }
    }

    fn log(action: AccessAction, at: DateTime<Utc>) -> AccessLogEntry {
        AccessLogEntry {
            plate_detected: "ABC123".to_string(),
            vehicle_id: Some(VehicleId::from("v1")),
            action,
            status: "GRANTED".to_string(),
            denial_reason: None,
            gate: "Main Gate".to_string(),
            timestamp: at,
            image_url: None,
        }
    }

    #[test]
    fn test_decision_by_status() {
        assert_eq!(decide(Some(&vehicle(VehicleStatus::Active))), AccessDecision::Granted);
        assert_eq!(
            decide(Some(&vehicle(VehicleStatus::Pending))),
            AccessDecision::Denied(Some(DenialReason::Pending))
        );
        assert_eq!(
            decide(Some(&vehicle(VehicleStatus::Blacklisted))),
            AccessDecision::Denied(Some(DenialReason::Blacklisted))
        );
        assert_eq!(decide(Some(&vehicle(VehicleStatus::Unknown))), AccessDecision::Denied(None));
        assert_eq!(decide(None), AccessDecision::Denied(Some(DenialReason::Unregistered)));
    }

    #[test]
    fn test_no_history_is_entry() {
        let sm = AccessStateMachine::new(Duration::seconds(30));
        let v = vehicle(VehicleStatus::Active);
        assert_eq!(
            sm.evaluate(Some(&v), None, t0()),
            AccessOutcome::Proceed { action: AccessAction::Entry, decision: AccessDecision::Granted }
        );
    }

    #[test]
    fn test_entry_then_suppressed_then_exit() {
        let sm = AccessStateMachine::new(Duration::seconds(30));
        let v = vehicle(VehicleStatus::Active);
        let prev = log(AccessAction::Entry, t0());

        assert_eq!(
            sm.evaluate(Some(&v), Some(&prev), t0() + Duration::seconds(10)),
            AccessOutcome::Suppressed { since_entry: Duration::seconds(10) }
        );
        assert_eq!(
            sm.evaluate(Some(&v), Some(&prev), t0() + Duration::seconds(90)),
            AccessOutcome::Proceed { action: AccessAction::Exit, decision: AccessDecision::Granted }
        );
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let sm = AccessStateMachine::new(Duration::seconds(30));
        let prev = log(AccessAction::Entry, t0());
        assert!(sm.next_action(Some(&prev), t0() + Duration::seconds(30)).is_err());
        assert_eq!(
            sm.next_action(Some(&prev), t0() + Duration::milliseconds(30_001)),
            Ok(AccessAction::Exit)
        );
    }

    #[test]
    fn test_after_exit_is_entry() {
        let sm = AccessStateMachine::new(Duration::seconds(30));
        let prev = log(AccessAction::Exit, t0());
        assert_eq!(sm.next_action(Some(&prev), t0() + Duration::seconds(1)), Ok(AccessAction::Entry));
    }

    #[test]
    fn test_clock_skew_suppresses() {
        let sm = AccessStateMachine::new(Duration::seconds(30));
        let prev = log(AccessAction::Entry, t0());
        assert!(sm.next_action(Some(&prev), t0() - Duration::seconds(5)).is_err());
    }

    #[test]
    fn test_unregistered_ignores_history() {
        let sm = AccessStateMachine::new(Duration::seconds(30));
        let prev = log(AccessAction::Entry, t0());
        assert_eq!(
            sm.evaluate(None, Some(&prev), t0() + Duration::seconds(1)),
            AccessOutcome::Proceed {
                action: AccessAction::Entry,
                decision: AccessDecision::Denied(Some(DenialReason::Unregistered)),
            }
        );
    }

    #[test]
    fn test_denied_vehicle_still_tracks_entry_exit() {
        let sm = AccessStateMachine::new(Duration::seconds(30));
        let v = vehicle(VehicleStatus::Blacklisted);
        let prev = log(AccessAction::Entry, t0());
        assert_eq!(
            sm.evaluate(Some(&v), Some(&prev), t0() + Duration::seconds(60)),
            AccessOutcome::Proceed {
                action: AccessAction::Exit,
                decision: AccessDecision::Denied(Some(DenialReason::Blacklisted)),
            }
        );
    }
}
