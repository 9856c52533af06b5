use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::eval::DecisionReason;

/// The public entry point a decision was produced by.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvaluationKind {
    Experiment,
    FeatureFlag,
    RemoteConfig,
}

#[derive(Debug, Default)]
struct Counters {
    decided: AtomicU64,
    exception: AtomicU64,
    timer_count: AtomicU64,
    timer_total_nanos: AtomicU64,
}

impl Counters {
    fn record(&self, elapsed: Duration, reason: DecisionReason) {
        if reason == DecisionReason::Exception {
            self.exception.fetch_add(1, Ordering::Relaxed);
        } else {
            self.decided.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.timer_count.fetch_add(1, Ordering::Relaxed);
        self.timer_total_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            decided: self.decided.load(Ordering::Relaxed),
            exception: self.exception.load(Ordering::Relaxed),
            timer_count: self.timer_count.load(Ordering::Relaxed),
            timer_total: Duration::from_nanos(self.timer_total_nanos.load(Ordering::Relaxed)),
        }
    }
}

/// Counters and timers for the decisions made by an [crate::Evaluator].
///
/// All updates are relaxed atomic increments, so one instance may be shared by every thread
/// evaluating against the same evaluator.
#[derive(Debug, Default)]
pub struct EvaluationMetrics {
    experiment: Counters,
    feature_flag: Counters,
    remote_config: Counters,
}

impl EvaluationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, kind: EvaluationKind) -> &Counters {
        match kind {
            EvaluationKind::Experiment => &self.experiment,
            EvaluationKind::FeatureFlag => &self.feature_flag,
            EvaluationKind::RemoteConfig => &self.remote_config,
        }
    }

    /// Records one decision. A decision with [DecisionReason::Exception] counts as an exception,
    /// every other reason counts as decided.
    pub fn record(&self, kind: EvaluationKind, elapsed: Duration, reason: DecisionReason) {
        self.counters(kind).record(elapsed, reason);
    }

    /// Starts timing a decision of `kind`.
    pub(crate) fn start(&self, kind: EvaluationKind) -> DecisionTimer<'_> {
        DecisionTimer {
            metrics: self,
            kind,
            started_at: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            experiment: self.experiment.snapshot(),
            feature_flag: self.feature_flag.snapshot(),
            remote_config: self.remote_config.snapshot(),
        }
    }
}

/// Measures one decision from creation until [DecisionTimer::stop].
pub(crate) struct DecisionTimer<'a> {
    metrics: &'a EvaluationMetrics,
    kind: EvaluationKind,
    started_at: Instant,
}

impl DecisionTimer<'_> {
    pub(crate) fn stop(self, reason: DecisionReason) {
        self.metrics
            .record(self.kind, self.started_at.elapsed(), reason);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersSnapshot {
    pub decided: u64,
    pub exception: u64,
    pub timer_count: u64,
    pub timer_total: Duration,
}

/// Point-in-time copy of [EvaluationMetrics].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub experiment: CountersSnapshot,
    pub feature_flag: CountersSnapshot,
    pub remote_config: CountersSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn records_outcomes_per_kind() {
        let metrics = EvaluationMetrics::new();
        metrics.record(
            EvaluationKind::Experiment,
            Duration::from_nanos(10),
            DecisionReason::TrafficAllocated,
        );
        metrics.record(
            EvaluationKind::Experiment,
            Duration::from_nanos(5),
            DecisionReason::Exception,
        );
        metrics.record(
            EvaluationKind::RemoteConfig,
            Duration::from_nanos(1),
            DecisionReason::DefaultRule,
        );

        let snapshot = metrics.snapshot();
        assert_that!(snapshot.experiment).is_equal_to(CountersSnapshot {
            decided: 1,
            exception: 1,
            timer_count: 2,
            timer_total: Duration::from_nanos(15),
        });
        assert_that!(snapshot.feature_flag.timer_count).is_equal_to(0);
        assert_that!(snapshot.remote_config.decided).is_equal_to(1);
    }

    #[test]
    fn timer_records_on_stop() {
        let metrics = EvaluationMetrics::new();
        metrics
            .start(EvaluationKind::FeatureFlag)
            .stop(DecisionReason::DefaultRule);

        let snapshot = metrics.snapshot();
        assert_that!(snapshot.feature_flag.decided).is_equal_to(1);
        assert_that!(snapshot.feature_flag.timer_count).is_equal_to(1);
    }

    #[test]
    fn counts_concurrent_decisions() {
        let metrics = Arc::new(EvaluationMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        metrics.record(
                            EvaluationKind::Experiment,
                            Duration::from_nanos(1),
                            DecisionReason::TrafficAllocated,
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_that!(snapshot.experiment.decided).is_equal_to(1000);
        assert_that!(snapshot.experiment.timer_total).is_equal_to(Duration::from_nanos(1000));
    }
}
