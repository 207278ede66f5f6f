// src/pipeline/schedule.rs

//! Recurring trigger and graceful shutdown.
//!
//! Every firing spawns its own cycle task. A firing that lands while a cycle
//! is still running therefore reaches `Monitor::run_cycle` and is skipped
//! there instead of piling up behind it.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use futures::future::join_all;
use tokio::task::JoinHandle;

use crate::error::{AppError, Result};
use crate::models::TriggerConfig;
use crate::pipeline::{CycleReport, Monitor};

/// Interval used when neither `interval_ms` nor `schedule` is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(300_000);

/// When cycles fire.
#[derive(Debug, Clone)]
pub enum Trigger {
    Interval(Duration),
    Cron(Box<Schedule>),
}

impl Trigger {
    pub fn from_config(config: &TriggerConfig) -> Result<Self> {
        match (&config.schedule, config.interval_ms) {
            (Some(expr), _) => Self::cron(expr),
            (None, Some(0)) => Err(AppError::config("trigger.interval_ms must be > 0")),
            (None, Some(ms)) => Ok(Self::Interval(Duration::from_millis(ms))),
            (None, None) => Ok(Self::Interval(DEFAULT_INTERVAL)),
        }
    }

    /// Parse a cron expression; classic five-field expressions get a
    /// leading seconds field of `0`.
    pub fn cron(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let normalized = if expr.split_whitespace().count() == 5 {
            format!("0 {}", expr)
        } else {
            expr.to_string()
        };
        let schedule = Schedule::from_str(&normalized)
            .map_err(|e| AppError::config(format!("trigger.schedule '{}': {}", expr, e)))?;
        Ok(Self::Cron(Box::new(schedule)))
    }

    /// Time until the next firing, `None` when a schedule has no more.
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Interval(interval) => Some(*interval),
            Self::Cron(schedule) => schedule
                .after(&now)
                .next()
                .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO)),
        }
    }

    /// Whether a cycle runs immediately at startup.
    pub fn fires_on_start(&self, run_on_start: bool) -> bool {
        run_on_start && matches!(self, Self::Interval(_))
    }
}

/// Drive `monitor` from `trigger` until `shutdown` resolves.
///
/// In-flight cycles get `grace` to finish and are aborted afterwards, then
/// the monitor is shut down.
pub async fn run_scheduled<S>(
    monitor: Arc<Monitor>,
    trigger: Trigger,
    run_on_start: bool,
    grace: Duration,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut in_flight: Vec<JoinHandle<CycleReport>> = Vec::new();

    if trigger.fires_on_start(run_on_start) {
        in_flight.push(spawn_cycle(&monitor));
    }

    loop {
        in_flight.retain(|handle| !handle.is_finished());

        let Some(delay) = trigger.next_delay(Utc::now()) else {
            log::warn!("Schedule has no upcoming firings; stopping");
            break;
        };
        log::debug!("Next cycle in {:?}", delay);

        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Shutdown requested");
                break;
            }
            _ = tokio::time::sleep(delay) => {
                in_flight.push(spawn_cycle(&monitor));
            }
        }
    }

    drain(in_flight, grace).await;
    monitor.shutdown().await
}

fn spawn_cycle(monitor: &Arc<Monitor>) -> JoinHandle<CycleReport> {
    let monitor = Arc::clone(monitor);
    tokio::spawn(async move { monitor.run_cycle().await })
}

/// Wait up to `grace` for running cycles, then abort the rest.
async fn drain(handles: Vec<JoinHandle<CycleReport>>, grace: Duration) {
    let handles: Vec<_> = handles.into_iter().filter(|h| !h.is_finished()).collect();
    if handles.is_empty() {
        return;
    }

    log::info!(
        "Waiting up to {}s for {} running cycle(s)",
        grace.as_secs(),
        handles.len()
    );
    let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
    if tokio::time::timeout(grace, join_all(handles)).await.is_err() {
        log::warn!("Grace period elapsed; abandoning running cycles");
        for abort in aborts {
            abort.abort();
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => log::info!("Received Ctrl-C"),
        _ = terminate => log::info!("Received SIGTERM"),
    }
}
