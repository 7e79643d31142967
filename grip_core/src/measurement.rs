//! Capture window for one grip: weights, running max and the summary.

use crate::error::ControllerError;
use crate::fixed_point::{Coefficient, Weight, compute_weight, mean, quantize};

/// Thresholds are quantized once to the session precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasureSettings {
    pub trigger: Weight,
    pub ceiling: Weight,
    pub precision: u8,
    pub duration_ms: u64,
}

impl MeasureSettings {
    pub fn new(trigger: f64, ceiling: f64, precision: u8, duration_ms: u64) -> Self {
        Self {
            trigger: quantize(trigger, precision),
            ceiling: quantize(ceiling, precision),
            precision,
            duration_ms,
        }
    }
}

/// What a single sample did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleOutcome {
    /// Window not open and the weight did not exceed the trigger.
    BelowTrigger(Weight),
    /// Weight appended. `started` is set on the sample that opened the window.
    Accepted { weight: Weight, started: bool },
    /// At or above the ceiling; dropped without closing the window.
    Discarded { weight: Weight, started: bool },
    /// Window already elapsed.
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementSummary {
    pub max: Weight,
    pub average: Weight,
    pub raw: Vec<Weight>,
}

#[derive(Debug, Clone)]
pub struct MeasurementSession {
    baseline: u16,
    coefficient: Coefficient,
    settings: MeasureSettings,
    samples: Vec<Weight>,
    max: Option<Weight>,
    started_at_ms: Option<u64>,
    closed: bool,
}

impl MeasurementSession {
    pub fn new(baseline: u16, coefficient: Coefficient, settings: MeasureSettings) -> Self {
        Self {
            baseline,
            coefficient,
            settings,
            samples: Vec::new(),
            max: None,
            started_at_ms: None,
            closed: false,
        }
    }

    pub fn baseline(&self) -> u16 {
        self.baseline
    }

    pub fn coefficient(&self) -> Coefficient {
        self.coefficient
    }

    pub fn is_started(&self) -> bool {
        self.started_at_ms.is_some()
    }

    pub fn started_at_ms(&self) -> Option<u64> {
        self.started_at_ms
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn samples(&self) -> &[Weight] {
        &self.samples
    }

    pub fn max(&self) -> Option<Weight> {
        self.max
    }

    pub fn weight_of(&self, sample: u16) -> Weight {
        compute_weight(self.baseline, sample, self.coefficient, self.settings.precision)
    }

    pub fn on_sample(&mut self, sample: u16, now_ms: u64) -> SampleOutcome {
        if self.closed {
            return SampleOutcome::Closed;
        }
        let weight = self.weight_of(sample);
        let started = if self.started_at_ms.is_none() {
            if weight <= self.settings.trigger {
                return SampleOutcome::BelowTrigger(weight);
            }
            self.started_at_ms = Some(now_ms);
            tracing::info!(%weight, "measurement window opened");
            true
        } else {
            false
        };

        if weight >= self.settings.ceiling {
            tracing::debug!(%weight, ceiling = %self.settings.ceiling, "sample above ceiling discarded");
            return SampleOutcome::Discarded { weight, started };
        }
        self.samples.push(weight);
        if self.max.is_none_or(|m| weight > m) {
            self.max = Some(weight);
        }
        SampleOutcome::Accepted { weight, started }
    }

    /// Freeze the session and summarize it. An empty session is `NoData`.
    pub fn close(&mut self) -> Result<MeasurementSummary, ControllerError> {
        self.closed = true;
        let average = mean(&self.samples, self.settings.precision).ok_or(ControllerError::NoData)?;
        let max = self.max.ok_or(ControllerError::NoData)?;
        Ok(MeasurementSummary {
            max,
            average,
            raw: self.samples.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> MeasurementSession {
        // 1 raw unit = 0.01
        MeasurementSession::new(
            0,
            Coefficient::from_micros(10_000),
            MeasureSettings::new(1.0, 150.0, 2, 5000),
        )
    }

    #[test]
    fn trigger_sample_opens_window_and_is_kept() {
        let mut s = session();
        assert!(matches!(s.on_sample(100, 0), SampleOutcome::BelowTrigger(_)));
        let out = s.on_sample(250, 10);
        assert_eq!(
            out,
            SampleOutcome::Accepted {
                weight: Weight::from_units(250, 2),
                started: true
            }
        );
        assert_eq!(s.started_at_ms(), Some(10));
        assert_eq!(s.samples().len(), 1);
    }

    #[test]
    fn ceiling_is_exclusive() {
        let mut s = session();
        s.on_sample(200, 0);
        assert!(matches!(
            s.on_sample(15_000, 1),
            SampleOutcome::Discarded { started: false, .. }
        ));
        assert!(matches!(s.on_sample(14_999, 2), SampleOutcome::Accepted { .. }));
    }

    #[test]
    fn summary_has_half_up_average() {
        let mut s = session();
        for v in [200, 300, 301] {
            s.on_sample(v, 0);
        }
        let sum = s.close().expect("samples present");
        assert_eq!(sum.max.to_string(), "3.01");
        assert_eq!(sum.average.to_string(), "2.67");
        assert_eq!(s.on_sample(400, 1), SampleOutcome::Closed);
    }

    #[test]
    fn empty_session_is_no_data() {
        let mut s = session();
        assert_eq!(s.close(), Err(ControllerError::NoData));
    }
}
