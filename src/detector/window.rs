//! Fixed-capacity rolling window of request outcomes.

use std::collections::VecDeque;

/// Ring of the most recent `capacity` outcomes, each `true` for a server
/// error. The oldest entry is evicted on overflow.
#[derive(Debug, Clone)]
pub struct ErrorWindow {
    samples: VecDeque<bool>,
    capacity: usize,
    errors: usize,
}

impl ErrorWindow {
    /// Create an empty window. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            errors: 0,
        }
    }

    /// Append one outcome, evicting the oldest when full.
    pub fn push(&mut self, is_error: bool) {
        if self.samples.len() >= self.capacity {
            if let Some(true) = self.samples.pop_front() {
                self.errors = self.errors.saturating_sub(1);
            }
        }
        self.samples.push_back(is_error);
        if is_error {
            self.errors = self.errors.saturating_add(1);
        }
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.errors = 0;
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` when no samples are held.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` once `capacity` samples have accumulated.
    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.capacity
    }

    /// Number of error samples currently held.
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Error percentage over the full capacity (0.0 - 100.0).
    pub fn error_rate_percent(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let rate = self.errors as f64 * 100.0 / self.capacity as f64;
        rate
    }
}
