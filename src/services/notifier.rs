//! Owner notifications - processed off the detection loop
//!
//! The decision pipeline enqueues a notice for every granted entry or exit of
//! a vehicle with a known owner phone. Enqueueing never waits: a full queue
//! drops the notice and counts it. The worker delivers SMS and in-app
//! notifications with a bounded number of deliveries in flight.

use crate::domain::types::AccessAction;
use crate::infra::metrics::Metrics;
use crate::io::notifications::NotificationSink;
use crate::io::sms::SmsGateway;
use chrono::{DateTime, Local, Utc};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

/// In-app notification kind for access events
pub const NOTICE_KIND: &str = "alert";

/// An access event to be reported to the vehicle owner
#[derive(Debug, Clone)]
pub struct AccessNotice {
    pub plate: String,
    pub action: AccessAction,
    pub owner_id: Option<String>,
    pub phone: String,
    pub at: DateTime<Utc>,
    /// When the notice was enqueued (for queue delay measurement)
    pub enqueued_at: Instant,
}

/// Message wording for owner notifications
#[derive(Debug, Clone)]
pub struct NoticeText {
    pub brand: String,
    pub site_name: String,
}

impl NoticeText {
    fn time_of_day(at: DateTime<Utc>) -> String {
        at.with_timezone(&Local).format("%I:%M %p").to_string()
    }

    pub fn title(&self, action: AccessAction) -> String {
        format!("Vehicle {}", action.as_str())
    }

    pub fn in_app_message(&self, notice: &AccessNotice) -> String {
        format!(
            "Your vehicle {} {} the {} at {}.",
            notice.plate,
            notice.action.verb(),
            self.site_name,
            Self::time_of_day(notice.at)
        )
    }

    pub fn sms_message(&self, notice: &AccessNotice) -> String {
        format!(
            "{}: Vehicle {} {} the {} at {}. If not you, remove this vehicle in your Dashboard.",
            self.brand,
            notice.plate,
            notice.action.verb(),
            self.site_name,
            Self::time_of_day(notice.at)
        )
    }
}

/// Enqueue side, held by the decision pipeline
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<AccessNotice>,
    metrics: Arc<Metrics>,
}

impl NotificationDispatcher {
    /// Queue a notice without waiting; returns false if it was dropped
    pub fn dispatch(&self, notice: AccessNotice) -> bool {
        match self.tx.try_send(notice) {
            Ok(()) => {
                self.metrics.record_notification_dispatched();
                true
            }
            Err(mpsc::error::TrySendError::Full(notice)) => {
                self.metrics.record_notification_dropped();
                warn!(plate = %notice.plate, "notification_dropped_queue_full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(notice)) => {
                self.metrics.record_notification_dropped();
                warn!(plate = %notice.plate, "notification_dropped_worker_stopped");
                false
            }
        }
    }
}

/// Worker that delivers notices with bounded concurrency
pub struct NotificationWorker {
    rx: mpsc::Receiver<AccessNotice>,
    sms: Option<Arc<dyn SmsGateway>>,
    sink: Arc<dyn NotificationSink>,
    text: Arc<NoticeText>,
    permits: Arc<Semaphore>,
    workers: u32,
    metrics: Arc<Metrics>,
}

impl NotificationWorker {
    /// Run until every dispatcher is dropped and in-flight deliveries finish
    pub async fn run(mut self) {
        info!(workers = %self.workers, "notification_worker_started");

        while let Some(notice) = self.rx.recv().await {
            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                break;
            };

            let queue_delay_ms = notice.enqueued_at.elapsed().as_millis() as u64;
            debug!(plate = %notice.plate, queue_delay_ms = %queue_delay_ms, "notification_dequeued");

            let sms = self.sms.clone();
            let sink = self.sink.clone();
            let text = self.text.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                deliver(notice, sms.as_deref(), sink.as_ref(), &text, &metrics).await;
                drop(permit);
            });
        }

        // Wait for in-flight deliveries
        let _ = self.permits.acquire_many(self.workers).await;
        info!("notification_worker_stopped");
    }
}

async fn deliver(
    notice: AccessNotice,
    sms: Option<&dyn SmsGateway>,
    sink: &dyn NotificationSink,
    text: &NoticeText,
    metrics: &Metrics,
) {
    if let Some(owner_id) = &notice.owner_id {
        let title = text.title(notice.action);
        let message = text.in_app_message(&notice);
        if let Err(e) = sink.send(owner_id, &title, &message, NOTICE_KIND).await {
            metrics.record_inapp_failed();
            warn!(plate = %notice.plate, error = %format!("{:#}", e), "inapp_notification_failed");
        }
    }

    let Some(sms) = sms else {
        return;
    };
    let message = text.sms_message(&notice);
    match sms.send(&notice.phone, &message).await {
        Ok(()) => {
            metrics.record_sms(true);
            info!(plate = %notice.plate, action = %notice.action, "owner_notified");
        }
        Err(e) => {
            metrics.record_sms(false);
            warn!(plate = %notice.plate, error = %format!("{:#}", e), "sms_failed");
        }
    }
}

/// Create a notification queue and its worker
///
/// Returns the dispatcher (for the pipeline) and the worker (to be spawned)
pub fn create_notifier(
    sms: Option<Arc<dyn SmsGateway>>,
    sink: Arc<dyn NotificationSink>,
    text: NoticeText,
    workers: usize,
    queue_size: usize,
    metrics: Arc<Metrics>,
) -> (NotificationDispatcher, NotificationWorker) {
    let workers = workers.clamp(1, Semaphore::MAX_PERMITS.min(u32::MAX as usize)) as u32;
    let (tx, rx) = mpsc::channel(queue_size.max(1));
    let dispatcher = NotificationDispatcher { tx, metrics: metrics.clone() };
    let worker = NotificationWorker {
        rx,
        sms,
        sink,
        text: Arc::new(text),
        permits: Arc::new(Semaphore::new(workers as usize)),
        workers,
        metrics,
    };
    (dispatcher, worker)
}
