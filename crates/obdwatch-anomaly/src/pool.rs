//! Bounded alert queue drained by a fixed set of dispatch workers

use crate::alerting::Alert;
use crate::dispatch::{AlertDispatcher, DispatchError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// delivery counters shared by the workers
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub delivered: AtomicU64,
    pub via_fallback: AtomicU64,
    pub failed: AtomicU64,
}

impl DispatchStats {
    pub fn get_stats(&self) -> (u64, u64, u64) {
        (
            self.delivered.load(Ordering::Relaxed),
            self.via_fallback.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

/// Why an alert could not be queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    Full,
    Closed,
}

/// Producer side of the queue; never blocks
#[derive(Debug, Clone)]
pub struct AlertQueue {
    tx: mpsc::Sender<Alert>,
}

impl AlertQueue {
    pub fn enqueue(&self, alert: Alert) -> Result<(), EnqueueError> {
        self.tx.try_send(alert).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

/// Worker tasks delivering queued alerts
pub struct DispatchPool {
    handles: Vec<JoinHandle<()>>,
    stats: Arc<DispatchStats>,
}

impl DispatchPool {
    /// Spawn `workers` tasks on the current tokio runtime
    pub fn spawn(
        dispatcher: Arc<AlertDispatcher>,
        workers: usize,
        capacity: usize,
    ) -> (AlertQueue, Self) {
        let (tx, rx) = mpsc::channel::<Alert>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let stats = Arc::new(DispatchStats::default());

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let dispatcher = dispatcher.clone();
                let stats = stats.clone();
                tokio::spawn(async move {
                    loop {
                        // hold the lock only while waiting for the next alert
                        let next = rx.lock().await.recv().await;
                        let Some(alert) = next else {
                            break;
                        };
                        debug!(worker, alert_id = %alert.id, "Dispatching alert");
                        match dispatcher.dispatch(alert).await {
                            Ok(report) => {
                                stats.delivered.fetch_add(1, Ordering::Relaxed);
                                if report.used_fallback() {
                                    stats.via_fallback.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                            Err(DispatchError::NotConfigured) | Err(DispatchError::Exhausted(_)) => {
                                stats.failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    debug!(worker, "Dispatch worker stopped");
                })
            })
            .collect();

        (AlertQueue { tx }, Self { handles, stats })
    }

    pub fn stats(&self) -> Arc<DispatchStats> {
        self.stats.clone()
    }

    /// Wait for the workers to drain the queue. Every `AlertQueue` clone must
    /// be dropped first; in-flight deliveries finish or time out.
    pub async fn join(self) -> Arc<DispatchStats> {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Dispatch worker panicked: {}", e);
            }
        }
        let (delivered, via_fallback, failed) = self.stats.get_stats();
        info!(delivered, via_fallback, failed, "Dispatch pool drained");
        self.stats
    }
}
