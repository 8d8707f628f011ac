//! Bounded rolling window of equal-length vectors.
//!
//! Used per session for action deltas and for attribution vectors. The
//! buffer carries the shape (vector length) of its contents; a vector of a
//! different shape restarts the window instead of being rejected.

use std::collections::VecDeque;

use tracing::warn;

/// What happened on [`SmoothingBuffer::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Appended,
    /// Shape changed; the buffer now holds only the new vector
    Reset { previous_len: usize, new_len: usize },
}

#[derive(Debug, Clone)]
pub struct SmoothingBuffer {
    capacity: usize,
    entries: VecDeque<Vec<f64>>,
}

impl SmoothingBuffer {
    /// A zero capacity is treated as 1 (no smoothing).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append `value`, evicting the oldest entry at capacity.
    pub fn push(&mut self, value: Vec<f64>) -> PushOutcome {
        let outcome = match self.shape() {
            Some(previous_len) if previous_len != value.len() => {
                warn!(
                    previous_len,
                    new_len = value.len(),
                    "Smoothing buffer shape changed, resetting"
                );
                self.entries.clear();
                PushOutcome::Reset {
                    previous_len,
                    new_len: value.len(),
                }
            }
            _ => PushOutcome::Appended,
        };

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(value);
        outcome
    }

    /// Elementwise mean of the buffered vectors; `None` when empty.
    pub fn average(&self) -> Option<Vec<f64>> {
        let first = self.entries.front()?;
        let mut sum = vec![0.0; first.len()];
        for entry in &self.entries {
            for (s, v) in sum.iter_mut().zip(entry) {
                *s += v;
            }
        }
        let n = self.entries.len() as f64;
        Some(sum.into_iter().map(|s| s / n).collect())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Length of the buffered vectors, if any are buffered.
    pub fn shape(&self) -> Option<usize> {
        self.entries.front().map(Vec::len)
    }
}
