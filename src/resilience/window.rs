//! Count-based sliding window of call outcomes.
//!
//! Shared by the circuit breaker and passive health accounting. Recording is
//! lock-free: a slot is claimed with a cursor increment and swapped, and the
//! aggregate counters are adjusted by the delta between the old and new slot.

use std::sync::atomic::{AtomicI64, AtomicU8, AtomicUsize, Ordering};

const EMPTY: u8 = 0;
const SUCCESS: u8 = 1;
const FAILURE: u8 = 2;

/// Outcome of a single backend call as seen by the resilience layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    fn as_slot(self) -> u8 {
        match self {
            Outcome::Success => SUCCESS,
            Outcome::Failure => FAILURE,
        }
    }
}

/// Aggregate view of a window at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub samples: usize,
    pub failures: usize,
}

impl WindowStats {
    pub fn failure_ratio(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.failures as f64 / self.samples as f64
        }
    }

    /// True once `min_samples` have been observed and the ratio reaches `threshold`.
    pub fn exceeds(&self, threshold: f64, min_samples: usize) -> bool {
        self.samples >= min_samples.max(1) && self.failure_ratio() >= threshold
    }
}

/// The last `capacity` outcomes.
#[derive(Debug)]
pub struct OutcomeWindow {
    slots: Box<[AtomicU8]>,
    cursor: AtomicUsize,
    samples: AtomicI64,
    failures: AtomicI64,
}

impl OutcomeWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| AtomicU8::new(EMPTY)).collect(),
            cursor: AtomicUsize::new(0),
            samples: AtomicI64::new(0),
            failures: AtomicI64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Record an outcome, evicting the oldest one once the window is full.
    pub fn record(&self, outcome: Outcome) {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let new = outcome.as_slot();
        let old = self.slots[idx].swap(new, Ordering::AcqRel);

        if old == EMPTY {
            self.samples.fetch_add(1, Ordering::AcqRel);
        }
        if old == FAILURE {
            self.failures.fetch_sub(1, Ordering::AcqRel);
        }
        if new == FAILURE {
            self.failures.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Current counts. Concurrent writers can make the raw counters lag each
    /// other briefly, so both are clamped into a consistent range.
    pub fn stats(&self) -> WindowStats {
        let samples = self.samples.load(Ordering::Acquire).clamp(0, self.slots.len() as i64);
        let failures = self.failures.load(Ordering::Acquire).clamp(0, samples);
        WindowStats {
            samples: samples as usize,
            failures: failures as usize,
        }
    }

    pub fn reset(&self) {
        for slot in self.slots.iter() {
            let old = slot.swap(EMPTY, Ordering::AcqRel);
            if old != EMPTY {
                self.samples.fetch_sub(1, Ordering::AcqRel);
            }
            if old == FAILURE {
                self.failures.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}
