//! Per-template render damping.
//!
//! The timer fires at `min(t_last + min, t0 + max)` where `t0` is the
//! first still-unrendered change and `t_last` the most recent one, so
//! a template under a steady stream of changes renders at most once
//! per `max`.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::WaitConfig;

#[derive(Debug)]
pub(crate) struct Quiescence {
    min: Duration,
    max: Duration,
    deadline: Option<Instant>,
    max_deadline: Option<Instant>,
}

impl Quiescence {
    pub fn new(wait: WaitConfig) -> Self {
        Self {
            min: wait.min,
            max: wait.max,
            deadline: None,
            max_deadline: None,
        }
    }

    /// Registers a change at `now`.
    pub fn tick(&mut self, now: Instant) {
        let max_deadline = *self.max_deadline.get_or_insert(now + self.max);
        self.deadline = Some((now + self.min).min(max_deadline));
    }

    pub fn pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn due(&self, now: Instant) -> bool {
        matches!(self.deadline, Some(d) if d <= now)
    }

    /// When the timer would next fire, if armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarms after a render (or a render no longer being needed).
    pub fn reset(&mut self) {
        self.deadline = None;
        self.max_deadline = None;
    }
}
