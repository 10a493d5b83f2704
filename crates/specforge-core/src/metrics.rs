//! Process-global counters.
//!
//! Incremented silently at the call site; [`Metrics::flush`] emits all of
//! them as one `info!` event at the end of a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Atomic counters. No allocation, no locking.
pub struct Metrics {
    candidates_started: AtomicU64,
    candidates_promoted: AtomicU64,
    candidates_failed: AtomicU64,
    candidates_cancelled: AtomicU64,
    static_repair_rounds: AtomicU64,
    dynamic_repair_rounds: AtomicU64,
    protocol_violations: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! counter {
    ($inc:ident, $get:ident, $field:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(metric = stringify!($field), "counter incremented");
        }

        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            candidates_started: AtomicU64::new(0),
            candidates_promoted: AtomicU64::new(0),
            candidates_failed: AtomicU64::new(0),
            candidates_cancelled: AtomicU64::new(0),
            static_repair_rounds: AtomicU64::new(0),
            dynamic_repair_rounds: AtomicU64::new(0),
            protocol_violations: AtomicU64::new(0),
        }
    }

    counter!(inc_candidates_started, candidates_started, candidates_started);
    counter!(inc_candidates_promoted, candidates_promoted, candidates_promoted);
    counter!(inc_candidates_failed, candidates_failed, candidates_failed);
    counter!(inc_candidates_cancelled, candidates_cancelled, candidates_cancelled);
    counter!(inc_static_repair_rounds, static_repair_rounds, static_repair_rounds);
    counter!(inc_dynamic_repair_rounds, dynamic_repair_rounds, dynamic_repair_rounds);
    counter!(inc_protocol_violations, protocol_violations, protocol_violations);

    /// Emit all current values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            candidates_started = self.candidates_started(),
            candidates_promoted = self.candidates_promoted(),
            candidates_failed = self.candidates_failed(),
            candidates_cancelled = self.candidates_cancelled(),
            static_repair_rounds = self.static_repair_rounds(),
            dynamic_repair_rounds = self.dynamic_repair_rounds(),
            protocol_violations = self.protocol_violations(),
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.candidates_started,
            &self.candidates_promoted,
            &self.candidates_failed,
            &self.candidates_cancelled,
            &self.static_repair_rounds,
            &self.dynamic_repair_rounds,
            &self.protocol_violations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_candidates_started();
        m.inc_candidates_started();
        m.inc_candidates_cancelled();
        m.inc_protocol_violations();
        assert_eq!(m.candidates_started(), 2);
        assert_eq!(m.candidates_cancelled(), 1);
        assert_eq!(m.protocol_violations(), 1);
        assert_eq!(m.candidates_promoted(), 0);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_static_repair_rounds();
        m.inc_dynamic_repair_rounds();
        m.inc_candidates_failed();
        m.reset();
        assert_eq!(m.static_repair_rounds(), 0);
        assert_eq!(m.dynamic_repair_rounds(), 0);
        assert_eq!(m.candidates_failed(), 0);
    }
}
