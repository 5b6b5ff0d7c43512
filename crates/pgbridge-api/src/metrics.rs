use std::fmt::{self, Write};

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use pgbridge_core::ListenerState;
use tracing::error;

use crate::state::AppState;

const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

const LISTENER_STATES: [ListenerState; 6] = [
    ListenerState::Disconnected,
    ListenerState::Connected,
    ListenerState::Subscribed,
    ListenerState::Reconnecting,
    ListenerState::Failed,
    ListenerState::Closed,
];

pub async fn metrics_handler(State(state): State<AppState>) -> Response {
    match render(&state).await {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Unable to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn render(state: &AppState) -> Result<String, fmt::Error> {
    let mut out = String::with_capacity(2048);
    let stats = state.stats.snapshot();
    let probe = state.health.probe();
    let listener_state = probe.state().await;
    let last_check = state.health.last().await;

    writeln!(out, "# TYPE pgbridge_info info")?;
    writeln!(out, "# HELP pgbridge_info Bridge build information")?;
    writeln!(out, "pgbridge_info{{version=\"{}\"}} 1", state.version)?;

    counter(
        &mut out,
        "pgbridge_notifications_received",
        "Notifications read from the source",
        stats.received,
    )?;
    counter(
        &mut out,
        "pgbridge_notifications_unrouted",
        "Notifications dropped for lack of a route or sink",
        stats.unrouted,
    )?;
    counter(
        &mut out,
        "pgbridge_notifications_dropped",
        "Notifications dropped because the dispatch backlog was full",
        stats.dropped,
    )?;
    counter(
        &mut out,
        "pgbridge_dispatches",
        "Sink calls scheduled",
        stats.dispatched,
    )?;

    writeln!(out, "# TYPE pgbridge_deliveries counter")?;
    writeln!(out, "# HELP pgbridge_deliveries Completed sink calls by result")?;
    writeln!(out, "pgbridge_deliveries_total{{result=\"delivered\"}} {}", stats.delivered)?;
    writeln!(out, "pgbridge_deliveries_total{{result=\"failed\"}} {}", stats.failed)?;

    writeln!(out, "# TYPE pgbridge_listener_state stateset")?;
    writeln!(out, "# HELP pgbridge_listener_state Current state of the source listener")?;
    for s in LISTENER_STATES {
        writeln!(
            out,
            "pgbridge_listener_state{{pgbridge_listener_state=\"{}\"}} {}",
            s,
            u8::from(s == listener_state)
        )?;
    }

    counter(
        &mut out,
        "pgbridge_listener_reconnects",
        "Successful reconnects to the source",
        probe.reconnect_count(),
    )?;

    writeln!(out, "# TYPE pgbridge_source_up gauge")?;
    writeln!(out, "# HELP pgbridge_source_up Outcome of the last source health check")?;
    writeln!(out, "pgbridge_source_up {}", u8::from(last_check.healthy))?;

    if let Some(t) = last_check.last_checked {
        writeln!(out, "# TYPE pgbridge_source_last_check_timestamp_seconds gauge")?;
        writeln!(
            out,
            "# HELP pgbridge_source_last_check_timestamp_seconds Unix time of the last source health check"
        )?;
        let secs = t.timestamp() as f64 + t.timestamp_subsec_millis() as f64 / 1000.0;
        writeln!(out, "pgbridge_source_last_check_timestamp_seconds {:.3}", secs)?;
    }

    let uptime = (Utc::now() - state.started_at).num_milliseconds() as f64 / 1000.0;
    writeln!(out, "# TYPE pgbridge_uptime_seconds gauge")?;
    writeln!(out, "# HELP pgbridge_uptime_seconds Time since the bridge started")?;
    writeln!(out, "pgbridge_uptime_seconds {:.3}", uptime)?;

    writeln!(out, "# EOF")?;
    Ok(out)
}

fn counter(out: &mut String, name: &str, help: &str, value: u64) -> fmt::Result {
    writeln!(out, "# TYPE {} counter", name)?;
    writeln!(out, "# HELP {} {}", name, help)?;
    writeln!(out, "{}_total {}", name, value)
}
