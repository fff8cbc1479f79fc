//! Background expiry of invoices that never received a verdict.
//!
//! Disabled unless `INVOICE_SWEEP_TIMEOUT_SECS` is set. Each stale invoice
//! gets one last ledger and gateway check before it is failed, so a payment
//! that did succeed is repaired to PAID instead.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::database::error::DatabaseError;
use crate::database::invoice_repository::InvoiceStore;
use crate::services::reconciler::{NotificationReconciler, ReconcileOutcome};

#[derive(Debug, Clone)]
pub struct InvoiceSweepConfig {
    /// Age after which a PENDING invoice is expired. `None` disables the sweep.
    pub pending_timeout: Option<Duration>,
    pub interval: Duration,
    pub batch_size: i64,
}

impl Default for InvoiceSweepConfig {
    fn default() -> Self {
        Self {
            pending_timeout: None,
            interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

impl InvoiceSweepConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.pending_timeout = std::env::var("INVOICE_SWEEP_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        cfg.interval = Duration::from_secs(
            std::env::var("INVOICE_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg.batch_size = std::env::var("INVOICE_SWEEP_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(cfg.batch_size);
        cfg
    }

    pub fn is_enabled(&self) -> bool {
        self.pending_timeout.is_some()
    }
}

/// Counts for one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub repaired: usize,
    /// Left PENDING because the gateway could not be asked.
    pub deferred: usize,
    pub errors: usize,
}

pub struct InvoiceSweepWorker {
    invoices: Arc<dyn InvoiceStore>,
    reconciler: Arc<NotificationReconciler>,
    config: InvoiceSweepConfig,
}

impl InvoiceSweepWorker {
    pub fn new(
        invoices: Arc<dyn InvoiceStore>,
        reconciler: Arc<NotificationReconciler>,
        config: InvoiceSweepConfig,
    ) -> Self {
        Self {
            invoices,
            reconciler,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let Some(timeout) = self.config.pending_timeout else {
            info!("invoice sweep disabled, INVOICE_SWEEP_TIMEOUT_SECS not set");
            return;
        };

        info!(
            pending_timeout_secs = timeout.as_secs(),
            interval_secs = self.config.interval.as_secs(),
            batch_size = self.config.batch_size,
            "invoice sweep worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("invoice sweep worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.sweep_once(timeout).await {
                        Ok(report) if report.examined > 0 => info!(
                            examined = report.examined,
                            expired = report.expired,
                            repaired = report.repaired,
                            deferred = report.deferred,
                            errors = report.errors,
                            "invoice sweep cycle finished"
                        ),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "invoice sweep cycle failed"),
                    }
                }
            }
        }

        info!("invoice sweep worker stopped");
    }

    /// Expire one batch of invoices older than `timeout`. A failure on one
    /// invoice is logged and does not stop the batch.
    pub async fn sweep_once(&self, timeout: Duration) -> Result<SweepReport, DatabaseError> {
        let age = chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - age;
        let stale = self
            .invoices
            .list_stale_pending(cutoff, self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };
        for invoice in stale {
            let invoice_id = invoice.id;
            match self.reconciler.expire(invoice, cutoff).await {
                Ok(reconciled) => match reconciled.outcome {
                    ReconcileOutcome::Repaired => {
                        report.repaired += 1;
                        warn!(invoice_id = %invoice_id, "stale invoice had a ledger credit, marked paid");
                    }
                    ReconcileOutcome::Pending => report.deferred += 1,
                    _ => {
                        report.expired += 1;
                        info!(invoice_id = %invoice_id, status = %reconciled.invoice.status, "stale invoice resolved");
                    }
                },
                Err(e) => {
                    report.errors += 1;
                    error!(invoice_id = %invoice_id, error = %e, "failed to expire invoice");
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_is_disabled_by_default() {
        let cfg = InvoiceSweepConfig::default();
        assert!(!cfg.is_enabled());
        assert_eq!(cfg.interval, Duration::from_secs(60));
        assert_eq!(cfg.batch_size, 100);
    }
}
