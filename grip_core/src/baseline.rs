//! Two-timer debounce that confirms an at-rest baseline from a noisy stream.
//!
//! An above-threshold sample arms a confirm timer carrying that sample as the
//! candidate. A below-threshold sample arms a cancel timer. The confirm timer
//! firing confirms the candidate; the cancel timer firing drops it. Each
//! above-threshold sample clears a pending cancel timer, so only an
//! uninterrupted low run of `drop_ms` aborts confirmation.

use crate::timer::{TimerHandle, TimerQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineTimer {
    Confirm { candidate: u16 },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineState {
    Idle,
    AwaitingConfirmation,
    Cancelling,
    Confirmed,
}

/// Outcome of a timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaselineEvent {
    Confirmed { baseline: u16 },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaselineSettings {
    pub threshold: u16,
    pub settle_ms: u64,
    pub drop_ms: u64,
}

#[derive(Debug, Clone)]
pub struct BaselineDetector {
    settings: BaselineSettings,
    timers: TimerQueue<BaselineTimer>,
    confirmed: Option<u16>,
}

const CONFIRM: BaselineTimer = BaselineTimer::Confirm { candidate: 0 };

impl BaselineDetector {
    pub fn new(settings: BaselineSettings) -> Self {
        Self {
            settings,
            timers: TimerQueue::new(),
            confirmed: None,
        }
    }

    pub fn settings(&self) -> BaselineSettings {
        self.settings
    }

    pub fn state(&self) -> BaselineState {
        if self.confirmed.is_some() {
            BaselineState::Confirmed
        } else if self.timers.is_armed(&BaselineTimer::Cancel) {
            BaselineState::Cancelling
        } else if self.timers.is_armed(&CONFIRM) {
            BaselineState::AwaitingConfirmation
        } else {
            BaselineState::Idle
        }
    }

    pub fn baseline(&self) -> Option<u16> {
        self.confirmed
    }

    /// Candidate captured by the pending confirm timer.
    pub fn candidate(&self) -> Option<u16> {
        match self.timers.get(&CONFIRM) {
            Some(TimerHandle {
                kind: BaselineTimer::Confirm { candidate },
                ..
            }) => Some(candidate),
            _ => None,
        }
    }

    /// Feed one decoded magnitude. Ignored once confirmed.
    pub fn on_sample(&mut self, sample: u16, now_ms: u64) {
        if self.confirmed.is_some() {
            return;
        }
        let t = self.settings.threshold;
        if sample > t {
            if self.timers.cancel(&BaselineTimer::Cancel) {
                tracing::debug!(sample, "baseline: drop interrupted");
            }
            if let Some(h) = self.timers.schedule_if_idle(
                BaselineTimer::Confirm { candidate: sample },
                now_ms,
                self.settings.settle_ms,
            ) {
                tracing::debug!(candidate = sample, deadline_ms = h.deadline_ms, "baseline: candidate captured");
            }
        } else if sample < t
            && self
                .timers
                .schedule_if_idle(BaselineTimer::Cancel, now_ms, self.settings.drop_ms)
                .is_some()
        {
            tracing::debug!(sample, "baseline: below threshold, cancel armed");
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        if self.confirmed.is_some() {
            return None;
        }
        self.timers.next_deadline()
    }

    /// Fire the earliest timer due at `now_ms`, if any.
    pub fn fire_due(&mut self, now_ms: u64) -> Option<BaselineEvent> {
        if self.confirmed.is_some() {
            return None;
        }
        let handle = self.timers.pop_due(now_ms)?;
        match handle.kind {
            BaselineTimer::Confirm { candidate } => {
                self.timers.clear();
                self.confirmed = Some(candidate);
                tracing::info!(baseline = candidate, "baseline confirmed");
                Some(BaselineEvent::Confirmed {
                    baseline: candidate,
                })
            }
            BaselineTimer::Cancel => {
                self.timers.cancel(&CONFIRM);
                tracing::info!("baseline dropped");
                Some(BaselineEvent::Stopped)
            }
        }
    }

    /// Drop every pending timer and any confirmed value.
    pub fn reset(&mut self) {
        self.timers.clear();
        self.confirmed = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> BaselineDetector {
        BaselineDetector::new(BaselineSettings {
            threshold: 1000,
            settle_ms: 1000,
            drop_ms: 500,
        })
    }

    #[test]
    fn sample_at_threshold_is_neutral() {
        let mut d = detector();
        d.on_sample(1000, 0);
        assert_eq!(d.state(), BaselineState::Idle);
        assert_eq!(d.next_deadline(), None);
    }

    #[test]
    fn candidate_is_the_first_high_sample() {
        let mut d = detector();
        d.on_sample(3500, 0);
        d.on_sample(3600, 100);
        assert_eq!(d.candidate(), Some(3500));
        assert_eq!(d.next_deadline(), Some(1000));
    }

    #[test]
    fn both_timers_pending_reads_as_cancelling() {
        let mut d = detector();
        d.on_sample(3500, 0);
        d.on_sample(10, 10);
        assert_eq!(d.state(), BaselineState::Cancelling);
        d.on_sample(3500, 20);
        assert_eq!(d.state(), BaselineState::AwaitingConfirmation);
    }

    #[test]
    fn confirmed_detector_ignores_input() {
        let mut d = detector();
        d.on_sample(3500, 0);
        assert_eq!(
            d.fire_due(1000),
            Some(BaselineEvent::Confirmed { baseline: 3500 })
        );
        d.on_sample(10, 1001);
        assert_eq!(d.state(), BaselineState::Confirmed);
        assert_eq!(d.fire_due(10_000), None);
    }
}
