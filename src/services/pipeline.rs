//! Per-plate access decision pipeline
//!
//! For each accepted plate token:
//! 1. Cooldown check on the token (no I/O when suppressed)
//! 2. Registry lookup with the fuzzy pattern
//! 3. Entry/exit evaluation against the vehicle's latest log entry
//! 4. Optional frame capture
//! 5. Access log append (the capture is removed again if this fails)
//! 6. Owner notification (granted + phone on file)
//! 7. Latest scan publication and cooldown update
//!
//! Store failures drop the event; the loop continues with the next plate.

use crate::domain::clock::Clock;
use crate::domain::plate::{PlatePattern, PlateToken};
use crate::domain::types::{AccessAction, AccessDecision, AccessLogEntry, Frame, ScanResult, Vehicle};
use crate::infra::metrics::Metrics;
use crate::io::access_log::AccessLogStore;
use crate::io::frames::CaptureWriter;
use crate::io::registry::VehicleRegistry;
use crate::services::access::{AccessOutcome, AccessStateMachine};
use crate::services::cooldown::Cooldown;
use crate::services::latest_scan::LatestScan;
use crate::services::notifier::{AccessNotice, NotificationDispatcher};
use chrono::Duration;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What happened to one plate sighting
#[derive(Debug, Clone, PartialEq)]
pub enum PlateOutcome {
    Logged(ScanResult),
    SuppressedCooldown,
    SuppressedDwell,
    Dropped,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub gate_name: String,
    pub dwell: Duration,
    pub cooldown: Duration,
}

/// Collaborators the pipeline reads from and writes to
pub struct PipelineDeps {
    pub registry: Arc<dyn VehicleRegistry>,
    pub access_log: Arc<dyn AccessLogStore>,
    pub notifier: NotificationDispatcher,
    pub latest: LatestScan,
    pub captures: Option<CaptureWriter>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
}

pub struct AccessPipeline {
    gate_name: String,
    state_machine: AccessStateMachine,
    cooldown: Cooldown,
    deps: PipelineDeps,
}

impl AccessPipeline {
    pub fn new(settings: PipelineSettings, deps: PipelineDeps) -> Self {
        Self {
            gate_name: settings.gate_name,
            state_machine: AccessStateMachine::new(settings.dwell),
            cooldown: Cooldown::new(settings.cooldown),
            deps,
        }
    }

    /// Run one plate token through the decision pipeline
    pub async fn process(&mut self, token: &PlateToken, frame: &Frame) -> PlateOutcome {
        let now = self.deps.clock.now();
        self.deps.metrics.record_plate_seen();

        if self.cooldown.is_cooling(token, now) {
            self.deps.metrics.record_suppressed_cooldown();
            return PlateOutcome::SuppressedCooldown;
        }

        let pattern = PlatePattern::new(token);
        let vehicle = match self.deps.registry.find_by_plate(&pattern).await {
            Ok(vehicle) => vehicle,
            Err(e) => {
                self.deps.metrics.record_store_error();
                warn!(plate = %token, error = %format!("{:#}", e), "registry_lookup_failed");
                return PlateOutcome::Dropped;
            }
        };

        let last = match &vehicle {
            Some(v) => match self.deps.access_log.find_latest(&v.id).await {
                Ok(last) => last,
                Err(e) => {
                    self.deps.metrics.record_store_error();
                    warn!(plate = %token, vehicle_id = %v.id, error = %format!("{:#}", e), "access_log_read_failed");
                    return PlateOutcome::Dropped;
                }
            },
            None => None,
        };

        let (action, decision) =
            match self.state_machine.evaluate(vehicle.as_ref(), last.as_ref().map(|s| &s.entry), now) {
                AccessOutcome::Proceed { action, decision } => (action, decision),
                AccessOutcome::Suppressed { since_entry } => {
                    self.deps.metrics.record_suppressed_dwell();
                    debug!(
                        plate = %token,
                        since_entry_ms = %since_entry.num_milliseconds(),
                        "recent_entry_suppressed"
                    );
                    return PlateOutcome::SuppressedDwell;
                }
            };

        let image_url = self.capture(frame, token, now).await;

        let entry = AccessLogEntry {
            plate_detected: token.to_string(),
            vehicle_id: vehicle.as_ref().map(|v| v.id.clone()),
            action,
            status: decision.status_str().to_string(),
            denial_reason: decision.denial_reason(),
            gate: self.gate_name.clone(),
            timestamp: now,
            image_url: image_url.clone(),
        };

        let id = match self.deps.access_log.append(&entry).await {
            Ok(id) => id,
            Err(e) => {
                self.deps.metrics.record_store_error();
                warn!(plate = %token, error = %format!("{:#}", e), "access_log_write_failed");
                self.discard_capture(image_url.as_deref()).await;
                return PlateOutcome::Dropped;
            }
        };

        self.cooldown.record(token, now);
        self.deps.metrics.record_event_logged(decision.is_granted());

        info!(
            id = %id,
            plate = %token,
            vehicle_id = ?entry.vehicle_id.as_ref().map(|v| v.0.as_str()),
            action = %action,
            status = %decision.status_str(),
            reason = ?decision.denial_reason().map(|r| r.as_str()),
            "access_logged"
        );

        self.notify(token, action, decision, vehicle.as_ref(), now);

        let scan = ScanResult {
            id,
            timestamp: now,
            plate_number: token.to_string(),
            action,
            access_granted: decision.is_granted(),
            access_status: decision.status_label(),
            vehicle,
            image_url,
        };
        self.deps.latest.publish(scan.clone());

        PlateOutcome::Logged(scan)
    }

    async fn capture(
        &self,
        frame: &Frame,
        token: &PlateToken,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Option<String> {
        let writer = self.deps.captures.as_ref()?;
        match writer.save(frame, now, token).await {
            Ok(url) => Some(url),
            Err(e) => {
                self.deps.metrics.record_capture_error();
                warn!(error = %format!("{:#}", e), "capture_failed");
                None
            }
        }
    }

    async fn discard_capture(&self, url: Option<&str>) {
        let (Some(writer), Some(url)) = (self.deps.captures.as_ref(), url) else {
            return;
        };
        if let Err(e) = writer.discard(url).await {
            warn!(url = %url, error = %format!("{:#}", e), "capture_discard_failed");
        }
    }

    fn notify(
        &self,
        token: &PlateToken,
        action: AccessAction,
        decision: AccessDecision,
        vehicle: Option<&Vehicle>,
        now: chrono::DateTime<chrono::Utc>,
    ) {
        if !decision.is_granted() {
            return;
        }
        let Some(vehicle) = vehicle else {
            return;
        };
        let Some(phone) = vehicle.owner_phone.as_deref().filter(|p| !p.trim().is_empty()) else {
            debug!(plate = %token, vehicle_id = %vehicle.id, "no_owner_phone");
            return;
        };

        self.deps.notifier.dispatch(AccessNotice {
            plate: token.to_string(),
            action,
            owner_id: vehicle.owner_id.clone(),
            phone: phone.to_string(),
            at: now,
            enqueued_at: Instant::now(),
        });
    }
}
