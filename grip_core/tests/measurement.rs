use grip_core::fixed_point::{Coefficient, Weight, compute_weight};
use grip_core::measurement::{MeasureSettings, MeasurementSession, SampleOutcome};
use proptest::prelude::*;

fn settings() -> MeasureSettings {
    MeasureSettings::new(1.0, 150.0, 2, 5000)
}

#[test]
fn thresholds_are_quantized_to_precision() {
    let s = MeasureSettings::new(1.004, 149.996, 2, 5000);
    assert_eq!(s.trigger, Weight::from_units(100, 2));
    assert_eq!(s.ceiling, Weight::from_units(15_000, 2));
}

#[test]
fn window_start_is_recorded_once() {
    let mut m = MeasurementSession::new(3500, Coefficient::from_micros(10_000), settings());
    assert!(!m.is_started());
    m.on_sample(3700, 40);
    m.on_sample(3800, 90);
    assert_eq!(m.started_at_ms(), Some(40));
}

proptest! {
    #[test]
    fn every_weight_matches_formula_and_max_never_decreases(
        baseline in any::<u16>(),
        micros in 1u32..50_000,
        samples in proptest::collection::vec(any::<u16>(), 1..60),
    ) {
        let coefficient = Coefficient::from_micros(micros);
        let mut m = MeasurementSession::new(baseline, coefficient, settings());
        let mut last_max: Option<Weight> = None;
        for (i, v) in samples.iter().enumerate() {
            let expected = compute_weight(baseline, *v, coefficient, 2);
            match m.on_sample(*v, i as u64) {
                SampleOutcome::Accepted { weight, .. } => {
                    prop_assert_eq!(weight, expected);
                    prop_assert!(weight < settings().ceiling);
                }
                SampleOutcome::Discarded { weight, .. } => {
                    prop_assert_eq!(weight, expected);
                    prop_assert!(weight >= settings().ceiling);
                }
                SampleOutcome::BelowTrigger(weight) => {
                    prop_assert_eq!(weight, expected);
                    prop_assert!(!m.is_started());
                }
                SampleOutcome::Closed => prop_assert!(false, "session never closed"),
            }
            if let (Some(prev), Some(now)) = (last_max, m.max()) {
                prop_assert!(now >= prev);
            }
            last_max = m.max();
        }
        if let Some(max) = m.max() {
            prop_assert!(m.samples().iter().all(|w| *w <= max));
            prop_assert!(m.samples().contains(&max));
        }
    }

    #[test]
    fn average_lies_between_min_and_max(
        samples in proptest::collection::vec(3601u16..15_000, 1..40),
    ) {
        let mut m = MeasurementSession::new(3500, Coefficient::from_micros(10_000), settings());
        for v in &samples {
            m.on_sample(*v, 0);
        }
        let summary = m.close().expect("at least one accepted sample");
        let min = summary.raw.iter().min().copied().expect("non-empty");
        prop_assert!(summary.average >= min);
        prop_assert!(summary.average <= summary.max);
    }
}
