use clipmark::{SamplingPolicy, sample, sample_with_margin};

#[test]
fn timestamps_stay_clear_of_the_end() {
    for &duration in &[0.2, 1.0, 3.5, 10.0, 61.7] {
        for policy in [
            SamplingPolicy::ByCount(2),
            SamplingPolicy::ByCount(7),
            SamplingPolicy::ByInterval(0.25),
            SamplingPolicy::ByInterval(1.0),
        ] {
            let ts = sample(duration, &policy).unwrap();
            assert!(!ts.is_empty(), "{duration} {policy:?}");
            assert_eq!(ts[0], 0.0);
            assert!(
                ts.windows(2).all(|w| w[0] < w[1]),
                "not increasing: {ts:?}"
            );
            assert!(
                ts.iter().all(|&t| t <= duration - 0.1 + 1e-9),
                "{duration} {policy:?} {ts:?}"
            );
        }
    }
}

#[test]
fn by_count_is_deterministic_and_inclusive() {
    let a = sample(12.0, &SamplingPolicy::ByCount(6)).unwrap();
    let b = sample(12.0, &SamplingPolicy::ByCount(6)).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 6);
    assert!((a[5] - 11.9).abs() < 1e-9);
}

#[test]
fn explicit_margin_changes_usable_end() {
    let ts = sample_with_margin(4.0, &SamplingPolicy::ByInterval(1.0), 1.5).unwrap();
    assert_eq!(ts, vec![0.0, 1.0, 2.0]);
    let ts = sample_with_margin(4.0, &SamplingPolicy::ByCount(2), 1.0).unwrap();
    assert_eq!(ts, vec![0.0, 3.0]);
}

#[test]
fn by_interval_count_matches_floor_formula() {
    for (duration, step) in [(3.5, 1.0), (10.0, 0.75), (7.3, 2.0), (1.05, 0.3)] {
        let ts = sample(duration, &SamplingPolicy::ByInterval(step)).unwrap();
        let expected = ((duration - 0.1) / step).floor() as usize + 1;
        assert_eq!(ts.len(), expected, "{duration} / {step}: {ts:?}");
        for w in ts.windows(2) {
            assert!((w[1] - w[0] - step).abs() < 1e-9);
        }
    }
}
