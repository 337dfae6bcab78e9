//! Storage health monitoring
//!
//! A probe saves a throwaway session and deletes it again, which exercises
//! the codec, the cookie signer and a full backend write/delete round trip.
//! Probes run on a fixed interval; the health endpoint only ever reads the
//! cached outcome.

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::session::{SessionStore, StoreError};
use crate::utils::periodic::PeriodicTask;

/// Name of the session written by health probes
pub const HEALTH_CHECK_SESSION: &str = "health-check";

/// Outcome of the most recent probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Probe latency on success, the failure message otherwise
    pub outcome: Result<Duration, String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Periodically probes the session store and caches the result
#[derive(Clone)]
pub struct HealthMonitor {
    store: Arc<SessionStore>,
    last: Arc<RwLock<Option<HealthReport>>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            store,
            last: Arc::new(RwLock::new(None)),
        }
    }

    /// Run one probe and record its outcome
    pub async fn check(&self) -> HealthReport {
        let started = Instant::now();
        let result = probe(&self.store).await;
        let elapsed = started.elapsed();

        let outcome = match result {
            Ok(()) => Ok(elapsed),
            Err(e) => {
                log::error!("Storage health check failed: {e}");
                Err(e.to_string())
            }
        };
        let report = HealthReport {
            outcome,
            checked_at: Utc::now(),
        };

        // Only hold the lock to publish, never across the probe
        let mut last = self
            .last
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *last = Some(report.clone());
        report
    }

    /// The cached outcome, if a probe has completed
    #[must_use]
    pub fn last_report(&self) -> Option<HealthReport> {
        self.last
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Probe immediately and then every `interval` on the current local task set
    ///
    /// Must be called from within the actix runtime.
    #[must_use]
    pub fn start(&self, interval: Duration) -> PeriodicTask {
        let monitor = self.clone();
        PeriodicTask::spawn_local(interval, true, move || {
            let monitor = monitor.clone();
            async move {
                monitor.check().await;
            }
        })
    }
}

async fn probe(store: &SessionStore) -> Result<(), StoreError> {
    let session = store.fresh(HEALTH_CHECK_SESSION);
    store.save(&session).await?;
    session.set_max_age(-1);
    store.save(&session).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryConnection;
    use crate::testing::{memory_store, store_with_connection, FailingConnection};

    #[actix_web::test]
    async fn test_probe_passes_and_leaves_nothing_behind() {
        let connection = Arc::new(MemoryConnection::new());
        let store = Arc::new(store_with_connection(connection.clone(), 600));
        let monitor = HealthMonitor::new(store);

        assert!(monitor.last_report().is_none());
        let report = monitor.check().await;
        assert!(report.is_healthy());
        assert_eq!(monitor.last_report(), Some(report));
        assert!(connection.is_empty());
    }

    #[actix_web::test]
    async fn test_probe_failure_is_cached() {
        let store = Arc::new(store_with_connection(Arc::new(FailingConnection), 600));
        let monitor = HealthMonitor::new(store);
        let report = monitor.check().await;
        assert!(!report.is_healthy());
        assert!(!monitor.last_report().unwrap().is_healthy());
    }

    #[actix_web::test]
    async fn test_started_monitor_probes_right_away() {
        let monitor = HealthMonitor::new(Arc::new(memory_store(600)));
        let task = monitor.start(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.stop().await.unwrap();
        assert!(monitor.last_report().unwrap().is_healthy());
    }
}
