//! Call Metrics
//!
//! One collector is built at startup and shared by the chain and by
//! whatever reports statistics. Counters are independent atomics; there is
//! no ordering between counters of different calls.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Default)]
struct MethodCounters {
    calls: AtomicU64,
    errors: AtomicU64,
    total_micros: AtomicU64,
}

/// Call counters for every method the chain has seen.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    total_calls: AtomicU64,
    total_errors: AtomicU64,
    in_flight: AtomicI64,
    methods: DashMap<String, MethodCounters>,
}

/// Marks a call as in flight until dropped.
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    collector: &'a MetricsCollector,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.collector.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a call as in flight for the lifetime of the returned guard.
    pub fn enter(&self) -> InFlightGuard<'_> {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard { collector: self }
    }

    /// Record one finished call.
    pub fn record(&self, method: &str, duration: Duration, is_error: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if is_error {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }

        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        let entry = self.methods.entry(method.to_string()).or_default();
        entry.calls.fetch_add(1, Ordering::Relaxed);
        entry.total_micros.fetch_add(micros, Ordering::Relaxed);
        if is_error {
            entry.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Calls currently between chain entry and completion.
    pub fn in_flight(&self) -> i64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let error_rate = if total_calls == 0 {
            0.0
        } else {
            total_errors as f64 / total_calls as f64 * 100.0
        };

        let methods = self
            .methods
            .iter()
            .map(|entry| {
                let calls = entry.calls.load(Ordering::Relaxed);
                let total_micros = entry.total_micros.load(Ordering::Relaxed);
                let avg_duration_ms = if calls == 0 {
                    0.0
                } else {
                    total_micros as f64 / calls as f64 / 1000.0
                };
                (
                    entry.key().clone(),
                    MethodSnapshot {
                        calls,
                        errors: entry.errors.load(Ordering::Relaxed),
                        avg_duration_ms,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            total_calls,
            total_errors,
            error_rate,
            in_flight: self.in_flight(),
            methods,
        }
    }

    /// Log the current statistics, one event per method.
    pub fn log_stats(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            total_calls = snapshot.total_calls,
            total_errors = snapshot.total_errors,
            error_rate = format_args!("{:.2}%", snapshot.error_rate),
            in_flight = snapshot.in_flight,
            "Call statistics"
        );
        for (method, stats) in &snapshot.methods {
            tracing::info!(
                method = %method,
                calls = stats.calls,
                errors = stats.errors,
                avg_duration_ms = stats.avg_duration_ms,
                "Method statistics"
            );
        }
    }

    /// Clear totals and per-method counters. In-flight calls are kept.
    pub fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.total_errors.store(0, Ordering::Relaxed);
        self.methods.clear();
    }
}

/// Serializable copy of the collector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub total_errors: u64,
    /// Percentage of calls that ended in error.
    pub error_rate: f64,
    pub in_flight: i64,
    pub methods: BTreeMap<String, MethodSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodSnapshot {
    pub calls: u64,
    pub errors: u64,
    pub avg_duration_ms: f64,
}
