use storm_common::Config;

const SAMPLE: &str = include_str!("../../../config/storm.yaml");

#[test]
fn test_sample_config_parses() {
    let config = Config::from_yaml(SAMPLE).unwrap();

    assert_eq!(config.targets.len(), 3);
    assert_eq!(config.targets[0].base_url, "http://127.0.0.1:8000");
    assert!(config.transport.http2_only);

    assert_eq!(config.population.web_browser_count, 5);
    assert_eq!(config.population.reset_flood.profiles, vec!["light", "medium"]);
    assert_eq!(config.population.rapid_reset.intensities, vec!["low", "medium"]);

    let burst = &config.profiles["burst"];
    assert_eq!(burst.concurrency, 40);
    assert_eq!(burst.target_rate, 120);
    assert_eq!(burst.reset_probability, 0.85);

    assert!(config.metrics.enabled);
    assert_eq!(config.events.path.as_deref(), Some("logs/events.jsonl"));
    assert_eq!(config.seed, None);
}

#[test]
fn test_missing_phases_default_to_zero() {
    let config = Config::from_yaml(SAMPLE).unwrap();

    let attack_only = &config.scenarios["attack_only"];
    assert_eq!(attack_only.normal_traffic_duration, 0.0);
    assert_eq!(attack_only.baseline_duration, 0.0);
    assert_eq!(attack_only.attack_duration, 120.0);

    let quiet = &config.scenarios["quiet"];
    assert_eq!(quiet.normal_traffic_duration, 600.0);
    assert_eq!(quiet.attack_duration, 0.0);
}

#[test]
fn test_minimal_config_fills_defaults() {
    let yaml = r#"
targets:
  - name: local
    base_url: http://127.0.0.1:9000
population:
  web_browser_count: 1
scenarios:
  short:
    attack_duration: 1.5
seed: 42
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert!(!config.transport.http2_only);
    assert_eq!(config.transport.pool_max_idle_per_host, 100);
    assert_eq!(config.population.streaming_count, 0);
    assert!(config.population.reset_flood.profiles.is_empty());
    assert!(config.profiles.is_empty());

    assert_eq!(config.browsing.request_rate_min, 0.5);
    assert_eq!(config.browsing.request_rate_max, 2.0);
    assert_eq!(config.browsing.think_time_secs, [1.0, 5.0]);
    assert_eq!(config.browsing.session_gap_secs, [10.0, 30.0]);
    assert!(!config.browsing.paths.is_empty());

    assert_eq!(config.streaming.sessions_per_bot, 3);
    assert_eq!(config.streaming.path, "/streaming");

    assert_eq!(config.continuous.scenario_min_secs, 300.0);
    assert_eq!(config.continuous.scenario_max_secs, 900.0);
    assert_eq!(config.continuous.idle_min_secs, 10.0);
    assert_eq!(config.continuous.idle_max_secs, 60.0);

    assert!(!config.metrics.enabled);
    assert_eq!(config.events.path, None);
    assert!(config.events.log_requests);
    assert_eq!(config.seed, Some(42));
    assert_eq!(config.scenarios["short"].attack_duration, 1.5);
}

#[test]
fn test_missing_targets_is_rejected() {
    let yaml = r#"
population: {}
scenarios: {}
"#;
    assert!(Config::from_yaml(yaml).is_err());
}
