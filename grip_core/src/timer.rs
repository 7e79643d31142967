//! Explicit one-shot timers on a millisecond timeline.
//!
//! Timers never call back into their owner. The owner asks for the next due
//! handle and acts on it, which keeps all firing on the event-loop thread.
//! At most one timer per kind (enum variant) is armed. Generations grow
//! with every arm: they order timers that share a deadline, and an owner
//! that notes [`TimerQueue::mark`] when a new phase begins can tell handles
//! armed before it from its own.

use std::mem::{Discriminant, discriminant};

/// One armed timer. `kind` may carry data captured at schedule time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle<K> {
    pub kind: K,
    pub generation: u64,
    pub deadline_ms: u64,
}

impl<K> TimerHandle<K> {
    /// True when this handle was armed at or after `mark`.
    pub fn armed_since(&self, mark: u64) -> bool {
        self.generation >= mark
    }
}

#[derive(Debug, Clone)]
pub struct TimerQueue<K> {
    next_generation: u64,
    armed: Vec<TimerHandle<K>>,
}

impl<K> Default for TimerQueue<K> {
    fn default() -> Self {
        Self {
            next_generation: 1,
            armed: Vec::new(),
        }
    }
}

impl<K: Copy + std::fmt::Debug> TimerQueue<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generation the next arm will get.
    pub fn mark(&self) -> u64 {
        self.next_generation
    }

    fn slot(&self, d: Discriminant<K>) -> Option<usize> {
        self.armed.iter().position(|h| discriminant(&h.kind) == d)
    }

    /// Arm `kind` to fire `delay_ms` after `now_ms`, replacing an armed timer of the same kind.
    pub fn schedule(&mut self, kind: K, now_ms: u64, delay_ms: u64) -> TimerHandle<K> {
        let handle = TimerHandle {
            kind,
            generation: self.next_generation,
            deadline_ms: now_ms.saturating_add(delay_ms),
        };
        self.next_generation += 1;
        match self.slot(discriminant(&kind)) {
            Some(i) => self.armed[i] = handle,
            None => self.armed.push(handle),
        }
        tracing::trace!(?kind, deadline_ms = handle.deadline_ms, "timer armed");
        handle
    }

    /// Arm `kind` only when no timer of that kind is pending.
    pub fn schedule_if_idle(
        &mut self,
        kind: K,
        now_ms: u64,
        delay_ms: u64,
    ) -> Option<TimerHandle<K>> {
        if self.is_armed(&kind) {
            return None;
        }
        Some(self.schedule(kind, now_ms, delay_ms))
    }

    pub fn is_armed(&self, kind: &K) -> bool {
        self.slot(discriminant(kind)).is_some()
    }

    /// The armed handle of this kind, if any.
    pub fn get(&self, kind: &K) -> Option<TimerHandle<K>> {
        self.slot(discriminant(kind)).map(|i| self.armed[i])
    }

    /// Cancel the armed timer of this kind. Returns whether one was armed.
    pub fn cancel(&mut self, kind: &K) -> bool {
        match self.slot(discriminant(kind)) {
            Some(i) => {
                let h = self.armed.swap_remove(i);
                tracing::trace!(kind = ?h.kind, "timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.armed.clear();
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.armed.iter().map(|h| h.deadline_ms).min()
    }

    /// Remove and return the earliest timer due at `now_ms`. Ties go to the
    /// one armed first.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<TimerHandle<K>> {
        let (i, _) = self
            .armed
            .iter()
            .enumerate()
            .filter(|(_, h)| h.deadline_ms <= now_ms)
            .min_by_key(|(_, h)| (h.deadline_ms, h.generation))?;
        Some(self.armed.swap_remove(i))
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}
