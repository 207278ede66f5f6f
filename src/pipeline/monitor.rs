// src/pipeline/monitor.rs

//! Polling cycle orchestration.
//!
//! A [`Monitor`] owns all mutable state (snapshots and bootstrap flags)
//! behind one async mutex. `run_cycle` acquires it with `try_lock`, so a
//! cycle fired while another is still running is skipped rather than queued.
//!
//! Per target and cycle:
//!
//! 1. Extract under the retry policy; classify as Success, Empty or Failure.
//! 2. Until the target has had one successful poll, store silently.
//! 3. Afterwards, classify against the stored snapshot and alert on
//!    first observation, change or closure.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{Config, MonitorConfig, PollOutcome, PollStatus, PositionRecord, Snapshot, Target};
use crate::pipeline::{ChangeDetector, RetryPolicy};
use crate::services::{AlertKind, Extractor, Notifier, compose};
use crate::storage::StateStore;

/// What happened for one target during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    /// First successful poll, stored without alerting
    Bootstrap,
    /// Positions appeared where none were known
    FirstObservation,
    Change,
    Closure,
    None,
}

impl fmt::Display for CycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bootstrap => "bootstrap",
            Self::FirstObservation => "first observation",
            Self::Change => "change",
            Self::Closure => "closure",
            Self::None => "none",
        };
        f.write_str(s)
    }
}

/// Result of one target within a cycle.
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub url: String,
    pub status: PollStatus,
    pub event: CycleEvent,
    /// Alerts handed to the notifier (or logged when suppressed)
    pub alerts: usize,
    /// Destinations that rejected the alert
    pub failed_deliveries: usize,
    /// Last extraction error when the poll failed
    pub error: Option<String>,
}

/// Summary of one `run_cycle` call.
#[derive(Debug, Clone)]
pub enum CycleReport {
    /// Another cycle was still running
    Skipped,
    Completed {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        targets: Vec<TargetReport>,
    },
}

impl CycleReport {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }

    pub fn targets(&self) -> &[TargetReport] {
        match self {
            Self::Skipped => &[],
            Self::Completed { targets, .. } => targets,
        }
    }

    /// Total alerts dispatched during the cycle.
    pub fn alerts(&self) -> usize {
        self.targets().iter().map(|t| t.alerts).sum()
    }

    pub fn failures(&self) -> usize {
        self.targets()
            .iter()
            .filter(|t| t.status == PollStatus::Failure)
            .count()
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Skipped => f.write_str("skipped (previous cycle still running)"),
            Self::Completed {
                started_at,
                finished_at,
                targets,
            } => {
                let elapsed = (*finished_at - *started_at).num_milliseconds() as f64 / 1000.0;
                write!(
                    f,
                    "{} targets in {:.1}s, {} alerts, {} failed polls",
                    targets.len(),
                    elapsed,
                    self.alerts(),
                    self.failures()
                )
            }
        }
    }
}

/// Mutable state owned by one monitor.
#[derive(Default)]
pub struct MonitorState {
    pub store: StateStore,
    /// Targets that completed their first successful poll in this process
    pub bootstrapped: HashSet<String>,
}

impl MonitorState {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            bootstrapped: HashSet::new(),
        }
    }
}

/// Polls every target once per cycle and alerts on meaningful changes.
pub struct Monitor {
    targets: Vec<Target>,
    settings: MonitorConfig,
    detector: ChangeDetector,
    retry: RetryPolicy,
    extractor: Arc<dyn Extractor>,
    notifier: Option<Arc<dyn Notifier>>,
    destinations: Vec<String>,
    state: Mutex<MonitorState>,
}

impl Monitor {
    /// Build a monitor; a `None` notifier behaves like `suppress_delivery`.
    pub fn new(
        config: &Config,
        extractor: Arc<dyn Extractor>,
        notifier: Option<Arc<dyn Notifier>>,
        store: StateStore,
    ) -> Self {
        Self {
            targets: config.targets.clone(),
            settings: config.monitor.clone(),
            detector: ChangeDetector::from_config(&config.monitor),
            retry: RetryPolicy::from_config(&config.monitor),
            extractor,
            notifier,
            destinations: config.notifier.chat_ids.clone(),
            state: Mutex::new(MonitorState::new(store)),
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Stored snapshot for `key`; waits for a running cycle.
    pub async fn snapshot(&self, key: &str) -> Option<Snapshot> {
        self.state.lock().await.store.get(key).cloned()
    }

    /// Run one polling cycle over every target, in configuration order.
    pub async fn run_cycle(&self) -> CycleReport {
        let Ok(mut state) = self.state.try_lock() else {
            log::warn!("Previous cycle still running; skipping this one");
            return CycleReport::Skipped;
        };

        let started_at = Utc::now();
        log::info!("Cycle started for {} targets", self.targets.len());

        let mut targets = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let (outcome, error) = self.poll(target).await;
            let mut report = TargetReport {
                url: target.url.clone(),
                status: outcome.status,
                event: CycleEvent::None,
                alerts: 0,
                failed_deliveries: 0,
                error,
            };
            self.apply(&mut state, target, outcome, &mut report).await;
            log::debug!(
                "{}: {:?}, event {}",
                target.display_name,
                report.status,
                report.event
            );
            targets.push(report);
        }

        let report = CycleReport::Completed {
            started_at,
            finished_at: Utc::now(),
            targets,
        };
        log::info!("Cycle finished: {}", report);
        report
    }

    /// Release the extraction session and flush state.
    ///
    /// Waits for a running cycle to finish first.
    pub async fn shutdown(&self) -> Result<()> {
        let state = self.state.lock().await;
        if let Err(e) = self.extractor.release().await {
            log::warn!("Failed to release extractor: {}", e);
        }
        state.store.flush().await?;
        log::info!("Monitor shut down");
        Ok(())
    }

    /// Extract with retries; errors end up in the outcome, never propagate.
    async fn poll(&self, target: &Target) -> (PollOutcome, Option<String>) {
        let timeout = target.timeout(self.settings.default_timeout());
        let result = self
            .retry
            .run(target.key(), timeout, |_| self.extractor.fetch(target, timeout))
            .await;

        match result {
            Ok(records) => (PollOutcome::from_records(records), None),
            Err(e) => {
                log::error!("{}: extraction failed: {}", target.display_name, e);
                (PollOutcome::failure(), Some(e.to_string()))
            }
        }
    }

    async fn apply(
        &self,
        state: &mut MonitorState,
        target: &Target,
        outcome: PollOutcome,
        report: &mut TargetReport,
    ) {
        let key = target.key();

        if !state.bootstrapped.contains(key) {
            match (outcome.status, outcome.records) {
                (PollStatus::Success, Some(records)) => {
                    log::info!(
                        "{}: bootstrap with {} positions",
                        target.display_name,
                        records.len()
                    );
                    state.store.set(key, records).await;
                    state.bootstrapped.insert(key.to_string());
                    report.event = CycleEvent::Bootstrap;
                }
                (PollStatus::Empty, _) => {
                    log::info!("{}: bootstrap with no open positions", target.display_name);
                    // A snapshot reloaded from disk predates this run
                    if state.store.remove(key).await {
                        log::info!("{}: dropped stale stored snapshot", target.display_name);
                    }
                    state.bootstrapped.insert(key.to_string());
                    report.event = CycleEvent::Bootstrap;
                }
                _ => {
                    log::warn!("{}: still waiting for a first successful poll", target.display_name);
                }
            }
            return;
        }

        let previous = state.store.get(key).cloned().unwrap_or_default();

        match (outcome.status, outcome.records) {
            (PollStatus::Empty, Some(records))
                if !self.settings.treat_empty_as_closure && !previous.is_empty() =>
            {
                self.detect(state, target, &previous, records, report).await;
            }
            (PollStatus::Failure | PollStatus::Empty, _) => {
                if previous.is_empty() {
                    log::info!("{}: no positions, nothing to report", target.display_name);
                    return;
                }
                log::info!(
                    "{}: all {} positions closed",
                    target.display_name,
                    previous.len()
                );
                state.store.clear(key).await;
                report.event = CycleEvent::Closure;
                self.dispatch(target, &AlertKind::Closure, &previous, report)
                    .await;
            }
            (PollStatus::Success, Some(records)) => {
                if previous.is_empty() {
                    log::info!(
                        "{}: {} positions opened",
                        target.display_name,
                        records.len()
                    );
                    state.store.set(key, records.clone()).await;
                    report.event = CycleEvent::FirstObservation;
                    self.dispatch(target, &AlertKind::FirstObservation, &records, report)
                        .await;
                } else {
                    self.detect(state, target, &previous, records, report).await;
                }
            }
            (PollStatus::Success, None) => {
                log::error!("{}: success without records", target.display_name);
            }
        }
    }

    async fn detect(
        &self,
        state: &mut MonitorState,
        target: &Target,
        previous: &[PositionRecord],
        current: Vec<PositionRecord>,
        report: &mut TargetReport,
    ) {
        let result = self.detector.compare(previous, &current);
        if !result.changed {
            log::debug!("{}: unchanged", target.display_name);
            return;
        }

        log::info!(
            "{}: {} changes detected",
            target.display_name,
            result.reasons.len()
        );
        for reason in &result.reasons {
            log::debug!("{}: {}", target.display_name, reason);
        }

        state.store.set(target.key(), current.clone()).await;
        report.event = CycleEvent::Change;
        self.dispatch(target, &AlertKind::Change(result), &current, report)
            .await;
    }

    /// Send (or log) one alert. Failures never roll back state.
    async fn dispatch(
        &self,
        target: &Target,
        kind: &AlertKind,
        positions: &[PositionRecord],
        report: &mut TargetReport,
    ) {
        let text = compose(target, kind, positions);
        report.alerts += 1;

        let notifier = match &self.notifier {
            Some(notifier) if !self.settings.suppress_delivery => notifier,
            _ => {
                log::info!("Delivery suppressed for {}:\n{}", target.display_name, text);
                return;
            }
        };

        for delivery in notifier.send(&text, &self.destinations).await {
            if let Err(e) = delivery.result {
                log::error!("{}: {}", target.display_name, e);
                report.failed_deliveries += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::{ComparisonKey, RecordField};
    use crate::pipeline::ChangeKind;
    use crate::storage::{LocalStorage, StateStorage};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    const A: &str = "https://app.example.com/#/actions/0xa";
    const B: &str = "https://app.example.com/#/actions/0xb";

    type Step = std::result::Result<Vec<PositionRecord>, &'static str>;

    /// Extractor replaying scripted results per target url.
    #[derive(Default)]
    struct Scripted {
        steps: std::sync::Mutex<HashMap<String, VecDeque<Step>>>,
        calls: AtomicUsize,
        released: AtomicUsize,
        gate: Option<(Notify, Notify)>,
    }

    impl Scripted {
        fn new(script: &[(&str, Vec<Step>)]) -> Self {
            let steps = script
                .iter()
                .map(|(url, steps)| (url.to_string(), steps.iter().cloned().collect()))
                .collect();
            Self {
                steps: std::sync::Mutex::new(steps),
                ..Self::default()
            }
        }

        fn gated(mut self) -> Self {
            self.gate = Some((Notify::new(), Notify::new()));
            self
        }
    }

    #[async_trait]
    impl Extractor for Scripted {
        async fn fetch(
            &self,
            target: &Target,
            _timeout: Duration,
        ) -> crate::error::Result<Vec<PositionRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((entered, open)) = &self.gate {
                entered.notify_one();
                open.notified().await;
            }
            let step = self
                .steps
                .lock()
                .unwrap()
                .get_mut(&target.url)
                .and_then(VecDeque::pop_front);
            match step {
                Some(Ok(records)) => Ok(records),
                Some(Err(message)) => Err(AppError::extraction(&target.url, message)),
                None => Err(AppError::extraction(&target.url, "script exhausted")),
            }
        }

        async fn release(&self) -> crate::error::Result<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Notifier keeping every delivered text; "bad" destinations fail.
    #[derive(Default)]
    struct Recorder {
        sent: std::sync::Mutex<Vec<String>>,
    }

    impl Recorder {
        fn texts(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn deliver(&self, text: &str, destination: &str) -> crate::error::Result<()> {
            if destination == "bad" {
                return Err(AppError::delivery(destination, "blocked"));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn position(token: &str, size: &str) -> PositionRecord {
        PositionRecord {
            token: token.into(),
            size: size.into(),
            net_value: "$20".into(),
            collateral: "$20".into(),
            entry_price: "$50,000".into(),
            mark_price: "$50,100".into(),
            liquidation_price: "$45,000".into(),
        }
    }

    fn target(url: &str, name: &str) -> Target {
        Target {
            url: url.into(),
            display_name: name.into(),
            description: "test".into(),
            rating: "A".into(),
            timeout_ms: None,
        }
    }

    fn config(urls: &[&str]) -> Config {
        let mut config = Config::default();
        config.targets = urls
            .iter()
            .enumerate()
            .map(|(i, url)| target(url, &format!("owner{i}")))
            .collect();
        config.monitor.retry_attempts = 1;
        config.monitor.retry_delay_ms = 0;
        config.monitor.comparison_key = ComparisonKey::Token;
        config.monitor.compare_field = RecordField::Size;
        config.monitor.threshold_percent = 5.0;
        config.notifier.chat_ids = vec!["42".into()];
        config
    }

    fn monitor(config: &Config, extractor: Arc<Scripted>, recorder: Arc<Recorder>) -> Monitor {
        let notifier: Arc<dyn Notifier> = recorder;
        Monitor::new(config, extractor, Some(notifier), StateStore::in_memory())
    }

    /// Monitor persisting to `path`, seeded with `stored` for `A` when given.
    async fn durable_monitor(
        path: &std::path::Path,
        stored: Option<Snapshot>,
        extractor: Arc<Scripted>,
        recorder: Arc<Recorder>,
    ) -> Monitor {
        let backend = Arc::new(LocalStorage::new(path));
        if let Some(snapshot) = stored {
            let seed = HashMap::from([(A.to_string(), snapshot)]);
            backend.save(&seed).await.unwrap();
        }
        let notifier: Arc<dyn Notifier> = recorder;
        let store = StateStore::durable(backend).await;
        Monitor::new(&config(&[A]), extractor, Some(notifier), store)
    }

    fn event(report: &CycleReport, index: usize) -> CycleEvent {
        report.targets()[index].event
    }

    #[tokio::test]
    async fn test_end_to_end_scenario() {
        let extractor = Arc::new(Scripted::new(&[(
            A,
            vec![
                Ok(vec![position("BTC 10x", "$100")]),
                Ok(vec![position("BTC 10x", "$100")]),
                Ok(vec![position("BTC 10x", "$106")]),
                Err("navigation failed"),
            ],
        )]));
        let recorder = Arc::new(Recorder::default());
        let monitor = monitor(&config(&[A]), extractor, recorder.clone());

        let first = monitor.run_cycle().await;
        assert_eq!(event(&first, 0), CycleEvent::Bootstrap);
        assert!(recorder.texts().is_empty());

        let second = monitor.run_cycle().await;
        assert_eq!(event(&second, 0), CycleEvent::None);
        assert!(recorder.texts().is_empty());

        let third = monitor.run_cycle().await;
        assert_eq!(event(&third, 0), CycleEvent::Change);
        let texts = recorder.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("*Position changed*: BTC 10x"));
        assert_eq!(monitor.snapshot(A).await.unwrap()[0].size, "$106");

        let fourth = monitor.run_cycle().await;
        assert_eq!(event(&fourth, 0), CycleEvent::Closure);
        assert_eq!(fourth.failures(), 1);
        let texts = recorder.texts();
        assert_eq!(texts.len(), 2);
        assert!(texts[1].contains("*Status*: All positions closed"));
        assert!(texts[1].contains("*Position 1:* BTC 10x"));
        assert_eq!(monitor.snapshot(A).await, Some(Vec::new()));
    }

    #[test]
    fn test_change_result_for_threshold() {
        let detector = ChangeDetector::from_config(&config(&[A]).monitor);
        let result = detector.compare(
            &[position("BTC 10x", "$100")],
            &[position("BTC 10x", "$106")],
        );
        assert_eq!(result.count(ChangeKind::ThresholdExceeded), 1);
        assert_eq!(result.reasons[0].subject_key, "BTC 10x");
    }

    #[tokio::test]
    async fn test_bootstrap_never_alerts() {
        let extractor = Arc::new(Scripted::new(&[(
            A,
            vec![Err("down"), Ok(vec![position("BTC 10x", "$100")])],
        )]));
        let recorder = Arc::new(Recorder::default());
        let monitor = monitor(&config(&[A]), extractor, recorder.clone());

        let first = monitor.run_cycle().await;
        assert_eq!(event(&first, 0), CycleEvent::None);
        assert!(monitor.snapshot(A).await.is_none());

        let second = monitor.run_cycle().await;
        assert_eq!(event(&second, 0), CycleEvent::Bootstrap);
        assert!(recorder.texts().is_empty());
        assert_eq!(monitor.snapshot(A).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_bootstrap_then_first_observation() {
        let extractor = Arc::new(Scripted::new(&[(
            A,
            vec![Ok(vec![]), Err("down"), Ok(vec![position("ETH 5x", "$10")])],
        )]));
        let recorder = Arc::new(Recorder::default());
        let monitor = monitor(&config(&[A]), extractor, recorder.clone());

        assert_eq!(event(&monitor.run_cycle().await, 0), CycleEvent::Bootstrap);
        assert!(monitor.snapshot(A).await.is_none());

        // Failure with no snapshot is a no-op
        assert_eq!(event(&monitor.run_cycle().await, 0), CycleEvent::None);
        assert!(recorder.texts().is_empty());

        assert_eq!(
            event(&monitor.run_cycle().await, 0),
            CycleEvent::FirstObservation
        );
        let texts = recorder.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("First-time positions detected"));
        assert_eq!(monitor.snapshot(A).await.unwrap()[0].token, "ETH 5x");
    }

    #[tokio::test]
    async fn test_closure_fires_once() {
        let extractor = Arc::new(Scripted::new(&[(
            A,
            vec![
                Ok(vec![position("BTC 10x", "$100"), position("ETH 5x", "$10")]),
                Ok(vec![]),
                Ok(vec![]),
                Err("down"),
            ],
        )]));
        let recorder = Arc::new(Recorder::default());
        let monitor = monitor(&config(&[A]), extractor, recorder.clone());

        monitor.run_cycle().await;
        assert_eq!(event(&monitor.run_cycle().await, 0), CycleEvent::Closure);
        assert_eq!(event(&monitor.run_cycle().await, 0), CycleEvent::None);
        assert_eq!(event(&monitor.run_cycle().await, 0), CycleEvent::None);

        let texts = recorder.texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("*Position 2:* ETH 5x"));
    }

    #[tokio::test]
    async fn test_empty_through_detector_when_closure_disabled() {
        let extractor = Arc::new(Scripted::new(&[(
            A,
            vec![Ok(vec![position("BTC 10x", "$100")]), Ok(vec![]), Err("down")],
        )]));
        let recorder = Arc::new(Recorder::default());
        let mut config = config(&[A]);
        config.monitor.treat_empty_as_closure = false;
        let monitor = monitor(&config, extractor, recorder.clone());

        monitor.run_cycle().await;
        assert_eq!(event(&monitor.run_cycle().await, 0), CycleEvent::Change);
        assert!(recorder.texts()[0].contains("*Position closed*: BTC 10x"));
        assert_eq!(monitor.snapshot(A).await, Some(Vec::new()));

        // Nothing left to close
        assert_eq!(event(&monitor.run_cycle().await, 0), CycleEvent::None);
        assert_eq!(recorder.texts().len(), 1);
    }

    #[tokio::test]
    async fn test_single_flight_skips_overlap() {
        let extractor = Arc::new(
            Scripted::new(&[(A, vec![Ok(vec![position("BTC 10x", "$100")])])]).gated(),
        );
        let recorder = Arc::new(Recorder::default());
        let monitor = Arc::new(monitor(&config(&[A]), extractor.clone(), recorder));

        let running = tokio::spawn({
            let monitor = Arc::clone(&monitor);
            async move { monitor.run_cycle().await }
        });

        let (entered, open) = extractor.gate.as_ref().unwrap();
        entered.notified().await;

        let overlapping = monitor.run_cycle().await;
        assert!(overlapping.is_skipped());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

        open.notify_one();
        let finished = running.await.unwrap();
        assert_eq!(event(&finished, 0), CycleEvent::Bootstrap);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_target_errors_are_isolated() {
        let extractor = Arc::new(Scripted::new(&[
            (A, vec![Err("boom")]),
            (B, vec![Ok(vec![position("SOL 3x", "$1")])]),
        ]));
        let recorder = Arc::new(Recorder::default());
        let monitor = monitor(&config(&[A, B]), extractor, recorder);

        let report = monitor.run_cycle().await;
        let targets = report.targets();
        assert_eq!(targets[0].status, PollStatus::Failure);
        assert!(targets[0].error.as_deref().unwrap().contains("boom"));
        assert_eq!(targets[1].event, CycleEvent::Bootstrap);
    }

    #[tokio::test]
    async fn test_suppressed_delivery_still_updates_state() {
        let extractor = Arc::new(Scripted::new(&[(
            A,
            vec![Ok(vec![]), Ok(vec![position("BTC 10x", "$100")])],
        )]));
        let recorder = Arc::new(Recorder::default());
        let mut config = config(&[A]);
        config.monitor.suppress_delivery = true;
        let monitor = monitor(&config, extractor, recorder.clone());

        monitor.run_cycle().await;
        let report = monitor.run_cycle().await;

        assert_eq!(event(&report, 0), CycleEvent::FirstObservation);
        assert_eq!(report.alerts(), 1);
        assert!(recorder.texts().is_empty());
        assert!(monitor.snapshot(A).await.is_some());
    }

    #[tokio::test]
    async fn test_delivery_failure_keeps_state() {
        let extractor = Arc::new(Scripted::new(&[(
            A,
            vec![Ok(vec![]), Ok(vec![position("BTC 10x", "$100")])],
        )]));
        let recorder = Arc::new(Recorder::default());
        let mut config = config(&[A]);
        config.notifier.chat_ids = vec!["bad".into(), "42".into()];
        let monitor = monitor(&config, extractor, recorder.clone());

        monitor.run_cycle().await;
        let report = monitor.run_cycle().await;

        assert_eq!(report.targets()[0].failed_deliveries, 1);
        assert_eq!(recorder.texts().len(), 1);
        assert_eq!(monitor.snapshot(A).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retries_within_a_cycle() {
        let extractor = Arc::new(Scripted::new(&[(
            A,
            vec![Err("flaky"), Ok(vec![position("BTC 10x", "$100")])],
        )]));
        let mut config = config(&[A]);
        config.monitor.retry_attempts = 3;
        let monitor = monitor(&config, extractor.clone(), Arc::new(Recorder::default()));

        let report = monitor.run_cycle().await;
        assert_eq!(report.targets()[0].status, PollStatus::Success);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_releases_extractor() {
        let extractor = Arc::new(Scripted::default());
        let monitor = monitor(&config(&[A]), extractor.clone(), Arc::new(Recorder::default()));

        monitor.shutdown().await.unwrap();
        assert_eq!(extractor.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_bootstrap_discards_reloaded_snapshot() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        let extractor = Arc::new(Scripted::new(&[(A, vec![Ok(vec![]), Ok(vec![])])]));
        let recorder = Arc::new(Recorder::default());
        let monitor = durable_monitor(
            &path,
            Some(vec![position("BTC 10x", "$100")]),
            extractor,
            recorder.clone(),
        )
        .await;
        assert_eq!(monitor.snapshot(A).await.unwrap().len(), 1);

        assert_eq!(event(&monitor.run_cycle().await, 0), CycleEvent::Bootstrap);
        assert!(monitor.snapshot(A).await.is_none());

        // No closure for positions closed before this run started
        assert_eq!(event(&monitor.run_cycle().await, 0), CycleEvent::None);
        assert!(recorder.texts().is_empty());

        let persisted = LocalStorage::new(&path).load().await.unwrap().unwrap();
        assert!(!persisted.targets.contains_key(A));
    }

    #[tokio::test]
    async fn test_shutdown_flushes_durable_state() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("state.json");
        let extractor = Arc::new(Scripted::new(&[(
            A,
            vec![Ok(vec![position("BTC 10x", "$100"), position("ETH 5x", "$10")])],
        )]));
        let monitor =
            durable_monitor(&path, None, extractor.clone(), Arc::new(Recorder::default())).await;

        assert_eq!(event(&monitor.run_cycle().await, 0), CycleEvent::Bootstrap);
        tokio::fs::remove_file(&path).await.unwrap();

        monitor.shutdown().await.unwrap();
        assert_eq!(extractor.released.load(Ordering::SeqCst), 1);

        let persisted = LocalStorage::new(&path).load().await.unwrap().unwrap();
        let tokens: Vec<_> = persisted.targets[A].iter().map(|r| r.token.as_str()).collect();
        assert_eq!(tokens, vec!["BTC 10x", "ETH 5x"]);
        assert!(persisted.updated_at.is_some());
    }
}
