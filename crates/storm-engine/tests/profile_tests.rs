use std::collections::BTreeMap;
use std::time::Duration;
use storm_common::ProfileConfig;
use storm_engine::engine::profile::{resolve_profile, IntensityProfile, StreamIntensity, ATTACK_PRESETS};
use storm_engine::ConfigurationError;

fn build(concurrency: usize, rate: u32, p: f64) -> Result<IntensityProfile, ConfigurationError> {
    IntensityProfile::new(
        "t",
        concurrency,
        rate,
        Duration::from_secs(10),
        p,
        vec!["/".to_string()],
        vec!["ua".to_string()],
    )
}

#[test]
fn test_presets_escalate() {
    let order = ["light", "medium", "heavy", "extreme"];
    let presets: Vec<_> = order.iter().map(|k| &ATTACK_PRESETS[k]).collect();

    for pair in presets.windows(2) {
        assert!(pair[0].concurrency() < pair[1].concurrency());
        assert!(pair[0].target_rate() < pair[1].target_rate());
        assert!(pair[0].reset_probability() < pair[1].reset_probability());
    }
    for p in &presets {
        let secs = p.duration().as_secs();
        assert!((30..=60).contains(&secs), "{} lasts {}s", p.name(), secs);
    }

    let light = &ATTACK_PRESETS["light"];
    assert_eq!(light.concurrency(), 20);
    assert_eq!(light.target_rate(), 50);
    assert_eq!(light.duration(), Duration::from_secs(30));
    assert_eq!(light.reset_probability(), 0.8);
}

#[test]
fn test_invalid_reset_probability_rejected() {
    assert!(matches!(build(1, 1, 1.5), Err(ConfigurationError::ResetProbability(_))));
    assert!(matches!(build(1, 1, -0.1), Err(ConfigurationError::ResetProbability(_))));
    assert!(matches!(build(1, 1, f64::NAN), Err(ConfigurationError::ResetProbability(_))));
    assert!(build(1, 1, 0.0).is_ok());
    assert!(build(1, 1, 1.0).is_ok());
}

#[test]
fn test_zero_concurrency_and_rate_rejected() {
    assert!(matches!(build(0, 10, 0.5), Err(ConfigurationError::ZeroConcurrency)));
    assert!(matches!(build(10, 0, 0.5), Err(ConfigurationError::ZeroRate)));
}

#[test]
fn test_empty_candidates_rejected() {
    let res = IntensityProfile::new("t", 1, 1, Duration::from_secs(1), 0.5, vec![], vec!["ua".into()]);
    assert!(matches!(res, Err(ConfigurationError::EmptyCandidates(_, "endpoints"))));

    let res = IntensityProfile::new("t", 1, 1, Duration::from_secs(1), 0.5, vec!["/".into()], vec![]);
    assert!(matches!(res, Err(ConfigurationError::EmptyCandidates(_, "user agents"))));
}

#[test]
fn test_batch_size_clamped_to_rate() {
    assert_eq!(build(200, 50, 0.5).unwrap().batch_size(), 50);
    assert_eq!(build(20, 50, 0.5).unwrap().batch_size(), 20);
}

#[test]
fn test_pacing_window_and_budget() {
    let p = build(20, 50, 0.5).unwrap();
    assert_eq!(p.pacing_window(50), Duration::from_secs(1));
    assert_eq!(p.pacing_window(20), Duration::from_millis(400));

    // 3 / 7 s rounds up so a paced batch never outruns the rate.
    let odd = build(3, 7, 0.5).unwrap();
    assert_eq!(odd.pacing_window(3), Duration::from_nanos(428_571_429));

    let light = &ATTACK_PRESETS["light"];
    assert_eq!(light.unit_budget(), 1500);
    assert_eq!(light.with_duration(Duration::from_millis(1500)).unit_budget(), 75);
}

#[test]
fn test_custom_profile_shadows_preset() {
    let mut custom = BTreeMap::new();
    custom.insert(
        "light".to_string(),
        ProfileConfig {
            name: "Custom Light".into(),
            concurrency: 5,
            target_rate: 10,
            duration_secs: 2.5,
            reset_probability: 0.3,
            endpoints: vec!["/x".into()],
            user_agents: vec!["ua".into()],
        },
    );

    let light = resolve_profile("light", &custom).unwrap();
    assert_eq!(light.name(), "Custom Light");
    assert_eq!(light.duration(), Duration::from_millis(2500));

    let heavy = resolve_profile("heavy", &custom).unwrap();
    assert_eq!(heavy.concurrency(), 100);

    assert!(matches!(
        resolve_profile("nope", &custom),
        Err(ConfigurationError::UnknownProfile(_))
    ));
}

#[test]
fn test_invalid_custom_profile_rejected() {
    let mut custom = BTreeMap::new();
    custom.insert(
        "bad".to_string(),
        ProfileConfig {
            name: "Bad".into(),
            concurrency: 5,
            target_rate: 10,
            duration_secs: 5.0,
            reset_probability: 2.0,
            endpoints: vec!["/x".into()],
            user_agents: vec!["ua".into()],
        },
    );
    assert!(matches!(
        resolve_profile("bad", &custom),
        Err(ConfigurationError::ResetProbability(_))
    ));

    custom.get_mut("bad").unwrap().reset_probability = 0.5;
    custom.get_mut("bad").unwrap().duration_secs = -1.0;
    assert!(matches!(
        resolve_profile("bad", &custom),
        Err(ConfigurationError::InvalidDuration(_))
    ));
}

#[test]
fn test_stream_intensity_table() {
    let low: StreamIntensity = "low".parse().unwrap();
    let medium: StreamIntensity = "Medium".parse().unwrap();
    let high: StreamIntensity = "HIGH".parse().unwrap();

    assert_eq!(low.streams_per_connection(), 100);
    assert_eq!(medium.streams_per_connection(), 1_000);
    assert_eq!(high.streams_per_connection(), 10_000);

    assert_eq!(low.reset_delay(), Duration::from_millis(10));
    assert_eq!(medium.reset_delay(), Duration::from_millis(1));
    assert_eq!(high.reset_delay(), Duration::from_micros(100));

    assert_eq!(low.connections(), 3);
    assert_eq!(high.connections(), 5);
    assert_eq!(high.to_string(), "high");

    assert!(matches!(
        "extreme".parse::<StreamIntensity>(),
        Err(ConfigurationError::UnknownIntensity(_))
    ));
}
