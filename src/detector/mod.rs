//! Anomaly detection over the ordered stream of request records.
//!
//! Two independent concerns share one input stream: a rolling error-rate
//! window with hysteresis, and failover detection at both the attempt level
//! (one request retried on another upstream) and the pool level (the active
//! pool changed). The detector performs no I/O and cannot fail.

pub mod window;

use std::fmt;

use tracing::debug;

use crate::parser::{is_server_error, RequestRecord, UNKNOWN_POOL};

pub use window::ErrorWindow;

/// Tuning for the [`Detector`].
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Records per error-rate evaluation window.
    pub window_size: usize,
    /// Error-rate breach threshold in percent.
    pub threshold_percent: f64,
    /// Evaluate the error rate on every Kth record only.
    pub evaluate_every: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: 200,
            threshold_percent: 2.0,
            evaluate_every: 1,
        }
    }
}

/// Where a failover was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailoverScope {
    /// A single request was retried on a different upstream address.
    Attempt,
    /// The pool serving traffic changed.
    Pool,
}

impl fmt::Display for FailoverScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attempt => f.write_str("upstream"),
            Self::Pool => f.write_str("pool"),
        }
    }
}

/// An operationally significant condition derived from the log stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AnomalyEvent {
    /// Traffic moved from one pool or upstream to another.
    Failover {
        /// Attempt-level or pool-level.
        scope: FailoverScope,
        /// Pool or address traffic moved away from.
        from: String,
        /// Pool or address traffic moved to.
        to: String,
    },
    /// The rolling server-error rate exceeded the threshold.
    HighErrorRate {
        /// Observed error rate in percent.
        rate_percent: f64,
        /// Configured threshold in percent.
        threshold_percent: f64,
        /// Number of records the rate was computed over.
        window_size: usize,
        /// Pool active when the breach was detected, if known.
        pool: Option<String>,
    },
}

/// Last pool identity seen in the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolState {
    current: Option<String>,
}

impl PoolState {
    /// The last observed pool, or `None` before the first known pool.
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Record `pool` as active, returning the previous pool when it differs.
    ///
    /// The first pool ever observed initialises the state without reporting
    /// a change.
    fn transition(&mut self, pool: &str) -> Option<String> {
        match self.current.as_deref() {
            Some(current) if current == pool => None,
            Some(_) => self.current.replace(pool.to_owned()),
            None => {
                self.current = Some(pool.to_owned());
                None
            }
        }
    }
}

/// Stateful detector fed one [`RequestRecord`] at a time, in log order.
#[derive(Debug, Clone)]
pub struct Detector {
    config: DetectorConfig,
    window: ErrorWindow,
    pool: PoolState,
    records_seen: u64,
}

impl Detector {
    /// Create a detector with an empty window and no known pool.
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            window: ErrorWindow::new(config.window_size),
            pool: PoolState::default(),
            records_seen: 0,
            config,
        }
    }

    /// Consume one record and return the anomalies it triggers.
    ///
    /// Events are ordered: attempt-level failover, pool-level failover, then
    /// high error rate.
    pub fn observe(&mut self, record: &RequestRecord) -> Vec<AnomalyEvent> {
        let mut events = Vec::new();
        self.records_seen = self.records_seen.saturating_add(1);
        self.window.push(record.is_error());

        if let Some(event) = attempt_failover(record) {
            events.push(event);
        }

        if record.pool != UNKNOWN_POOL {
            if let Some(previous) = self.pool.transition(&record.pool) {
                events.push(AnomalyEvent::Failover {
                    scope: FailoverScope::Pool,
                    from: previous,
                    to: record.pool.clone(),
                });
            }
        }

        if let Some(event) = self.evaluate_error_rate() {
            events.push(event);
        }

        events
    }

    /// The last observed pool.
    pub fn current_pool(&self) -> Option<&str> {
        self.pool.current()
    }

    /// Read-only view of the rolling error window.
    pub fn window(&self) -> &ErrorWindow {
        &self.window
    }

    /// Total records observed since construction.
    pub fn records_seen(&self) -> u64 {
        self.records_seen
    }

    fn evaluate_error_rate(&mut self) -> Option<AnomalyEvent> {
        if !self.window.is_full() {
            return None;
        }
        let every = u64::try_from(self.config.evaluate_every.max(1)).unwrap_or(1);
        if !self.records_seen.is_multiple_of(every) {
            return None;
        }

        let rate = self.window.error_rate_percent();
        if rate <= self.config.threshold_percent {
            return None;
        }

        debug!(
            rate,
            errors = self.window.error_count(),
            window = self.window.capacity(),
            "error rate over threshold, clearing window"
        );
        self.window.clear();

        Some(AnomalyEvent::HighErrorRate {
            rate_percent: rate,
            threshold_percent: self.config.threshold_percent,
            window_size: self.window.capacity(),
            pool: self.pool.current().map(str::to_owned),
        })
    }
}

/// A request whose first attempt failed (5xx or no response) and that was
/// retried on another upstream.
fn attempt_failover(record: &RequestRecord) -> Option<AnomalyEvent> {
    let attempts = record.attempts()?;
    if attempts.len() < 2 {
        return None;
    }
    let first = attempts.first()?;
    let last = attempts.last()?;
    if !(first.status.is_empty() || is_server_error(first.status)) {
        return None;
    }
    Some(AnomalyEvent::Failover {
        scope: FailoverScope::Attempt,
        from: first.addr.to_owned(),
        to: last.addr.to_owned(),
    })
}
