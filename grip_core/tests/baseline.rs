use grip_core::baseline::{BaselineDetector, BaselineEvent, BaselineSettings, BaselineState};
use proptest::prelude::*;
use rstest::rstest;

const SETTINGS: BaselineSettings = BaselineSettings {
    threshold: 1000,
    settle_ms: 1000,
    drop_ms: 500,
};

const HIGH: u16 = 3500;
const LOW: u16 = 20;

fn fire_until(d: &mut BaselineDetector, t: u64, out: &mut Vec<(u64, BaselineEvent)>) {
    while let Some(due) = d.next_deadline().filter(|due| *due <= t) {
        if let Some(e) = d.fire_due(due) {
            out.push((due, e));
        }
    }
}

/// Feed `(time, sample)` pairs in order, firing timers as time passes.
fn drive(events: &[(u64, u16)], until: u64) -> (BaselineDetector, Vec<(u64, BaselineEvent)>) {
    let mut d = BaselineDetector::new(SETTINGS);
    let mut out = Vec::new();
    for &(t, v) in events {
        fire_until(&mut d, t, &mut out);
        d.on_sample(v, t);
    }
    fire_until(&mut d, until, &mut out);
    (d, out)
}

#[rstest]
#[case::steady_high(
    vec![(0, HIGH), (100, 3600), (900, 3700)],
    vec![(1000, BaselineEvent::Confirmed { baseline: HIGH })]
)]
#[case::sustained_drop_aborts(
    vec![(0, HIGH), (200, LOW), (300, LOW), (600, LOW)],
    vec![(700, BaselineEvent::Stopped)]
)]
#[case::high_sample_clears_pending_drop(
    vec![(0, HIGH), (200, LOW), (400, 3300)],
    vec![(1000, BaselineEvent::Confirmed { baseline: HIGH })]
)]
#[case::drop_without_candidate_then_confirm(
    vec![(0, LOW), (600, 3300)],
    vec![
        (500, BaselineEvent::Stopped),
        (1600, BaselineEvent::Confirmed { baseline: 3300 }),
    ]
)]
#[case::pending_cancel_is_not_rescheduled(
    vec![(0, HIGH), (100, LOW), (550, LOW)],
    vec![(600, BaselineEvent::Stopped)]
)]
fn debounce_scenarios(
    #[case] events: Vec<(u64, u16)>,
    #[case] expected: Vec<(u64, BaselineEvent)>,
) {
    let (_, out) = drive(&events, 5000);
    assert_eq!(out, expected);
}

#[test]
fn reset_clears_everything() {
    let (mut d, _) = drive(&[(0, HIGH), (10, LOW)], 10);
    assert_eq!(d.state(), BaselineState::Cancelling);
    d.reset();
    assert_eq!(d.state(), BaselineState::Idle);
    assert_eq!(d.next_deadline(), None);
}

#[test]
fn candidate_is_captured_not_reread() {
    let (d, out) = drive(&[(0, 1200), (500, 9000), (999, 4000)], 1000);
    assert_eq!(out, vec![(1000, BaselineEvent::Confirmed { baseline: 1200 })]);
    assert_eq!(d.baseline(), Some(1200));
}

proptest! {
    #[test]
    fn uninterrupted_high_run_confirms_first_sample(
        first in 1001u16..=u16::MAX,
        rest in proptest::collection::vec((1u64..200, 1001u16..=u16::MAX), 0..20),
    ) {
        let mut events = vec![(0u64, first)];
        let mut t = 0;
        for (dt, v) in rest {
            t += dt;
            events.push((t, v));
        }
        let (d, out) = drive(&events, t.max(1000));
        prop_assert_eq!(out.first().copied(), Some((1000, BaselineEvent::Confirmed { baseline: first })));
        prop_assert_eq!(d.state(), BaselineState::Confirmed);
    }

    #[test]
    fn below_threshold_stream_never_confirms(
        samples in proptest::collection::vec((1u64..400, 0u16..1000), 1..40),
    ) {
        let mut t = 0;
        let events: Vec<(u64, u16)> = samples
            .into_iter()
            .map(|(dt, v)| {
                t += dt;
                (t, v)
            })
            .collect();
        let (d, out) = drive(&events, t + 1000);
        prop_assert!(out.iter().all(|(_, e)| *e == BaselineEvent::Stopped));
        prop_assert!(!out.is_empty());
        prop_assert_eq!(d.baseline(), None);
    }
}
