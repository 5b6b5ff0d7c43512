use std::sync::Arc;

use chrono::{DateTime, Utc};
use pgbridge_core::DispatchStats;

use crate::health::HealthMonitor;

#[derive(Clone)]
pub struct AppState {
    pub health: HealthMonitor,
    pub stats: Arc<DispatchStats>,
    pub started_at: DateTime<Utc>,
    pub version: String,
}

impl AppState {
    pub fn new(health: HealthMonitor, stats: Arc<DispatchStats>) -> Self {
        Self {
            health,
            stats,
            started_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}
