//! Single-slot cell holding the most recent logged decision
//!
//! Written only by the decision pipeline; any number of readers take
//! snapshots without blocking the writer.

use crate::domain::types::ScanResult;
use std::sync::Arc;
use tokio::sync::watch;

pub struct LatestScan {
    tx: watch::Sender<Option<Arc<ScanResult>>>,
}

#[derive(Clone)]
pub struct LatestScanReader {
    rx: watch::Receiver<Option<Arc<ScanResult>>>,
}

pub fn latest_scan_channel() -> (LatestScan, LatestScanReader) {
    let (tx, rx) = watch::channel(None);
    (LatestScan { tx }, LatestScanReader { rx })
}

impl LatestScan {
    /// Replace the current result
    pub fn publish(&self, scan: ScanResult) {
        self.tx.send_replace(Some(Arc::new(scan)));
    }

    pub fn reader(&self) -> LatestScanReader {
        LatestScanReader { rx: self.tx.subscribe() }
    }
}

impl LatestScanReader {
    pub fn snapshot(&self) -> Option<Arc<ScanResult>> {
        self.rx.borrow().clone()
    }
}
