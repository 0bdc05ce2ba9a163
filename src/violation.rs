//! Sliding-window violation accounting.

use crate::policy::SignalKind;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One counted violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: SignalKind,
    pub reason: String,
    pub timestamp_ms: u64,
}

/// Ordered log of recent violations, pruned to a fixed window on each insert.
#[derive(Debug, Clone)]
pub struct ViolationLog {
    window_ms: u64,
    entries: VecDeque<Violation>,
}

impl ViolationLog {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            entries: VecDeque::new(),
        }
    }

    /// Prune expired entries, append the new one and return the window count.
    ///
    /// An entry exactly `window_ms` old still counts.
    pub fn record(&mut self, kind: SignalKind, reason: impl Into<String>, now_ms: u64) -> usize {
        self.prune(now_ms);
        self.entries.push_back(Violation {
            kind,
            reason: reason.into(),
            timestamp_ms: now_ms,
        });
        self.entries.len()
    }

    fn prune(&mut self, now_ms: u64) {
        while let Some(front) = self.entries.front() {
            if now_ms.saturating_sub(front.timestamp_ms) > self.window_ms {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Violation> {
        self.entries.iter()
    }
}
