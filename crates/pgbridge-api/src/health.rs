//! Periodic liveness polling of the notification source.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pgbridge_core::{ListenerProbe, ListenerState};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Name under which the source check is reported.
pub const POSTGRES_CHECK: &str = "postgres";

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub healthy: bool,
    pub listener_state: ListenerState,
    pub last_checked: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl CheckResult {
    fn pending() -> Self {
        Self {
            name: POSTGRES_CHECK.to_string(),
            healthy: false,
            listener_state: ListenerState::Disconnected,
            last_checked: None,
            error: Some("not checked yet".to_string()),
        }
    }
}

/// Polls [`ListenerProbe::ping`] on a fixed interval and caches the outcome,
/// so health requests never wait on the database.
#[derive(Clone)]
pub struct HealthMonitor {
    probe: ListenerProbe,
    interval: Duration,
    last: Arc<RwLock<CheckResult>>,
}

impl HealthMonitor {
    pub fn new(probe: ListenerProbe, interval: Duration) -> Self {
        Self {
            probe,
            interval,
            last: Arc::new(RwLock::new(CheckResult::pending())),
        }
    }

    pub fn probe(&self) -> &ListenerProbe {
        &self.probe
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Most recent result; never touches the source.
    pub async fn last(&self) -> CheckResult {
        self.last.read().await.clone()
    }

    /// Pings once and stores the result. A ping that does not answer within
    /// one poll interval counts as a failure.
    pub async fn check(&self) -> CheckResult {
        let error = match tokio::time::timeout(self.interval, self.probe.ping()).await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "health check timed out after {}ms",
                self.interval.as_millis()
            )),
        };
        let result = CheckResult {
            name: POSTGRES_CHECK.to_string(),
            healthy: error.is_none(),
            listener_state: self.probe.state().await,
            last_checked: Some(Utc::now()),
            error,
        };

        let mut last = self.last.write().await;
        if last.healthy != result.healthy && last.last_checked.is_some() {
            if result.healthy {
                info!(check = POSTGRES_CHECK, "Health check recovered");
            } else {
                warn!(
                    check = POSTGRES_CHECK,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Health check failing"
                );
            }
        }
        *last = result.clone();
        result
    }

    /// Starts the polling loop. The first poll happens immediately.
    pub fn spawn(&self) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.check().await;
            }
        })
    }
}
