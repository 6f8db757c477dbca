use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub transport: TransportConfig,
    pub population: PopulationConfig,
    /// Custom intensity profiles. A name here shadows the built-in preset of the same name.
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
    #[serde(default)]
    pub browsing: BrowsingConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    pub scenarios: BTreeMap<String, ScenarioConfig>,
    #[serde(default)]
    pub continuous: ContinuousConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub events: EventsConfig,
    /// Seeds every random source when present, making runs reproducible.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Config {
    pub fn from_yaml(data: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(data)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    pub name: String,
    /// Cleartext base URL, e.g. `http://127.0.0.1:8000`.
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    /// Speak HTTP/2 with prior knowledge instead of HTTP/1.1.
    #[serde(default)]
    pub http2_only: bool,
    #[serde(default = "default_pool_idle")]
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            http2_only: false,
            pool_max_idle_per_host: default_pool_idle(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PopulationConfig {
    #[serde(default)]
    pub web_browser_count: usize,
    #[serde(default)]
    pub streaming_count: usize,
    #[serde(default)]
    pub reset_flood: ResetFloodGroup,
    #[serde(default)]
    pub rapid_reset: RapidResetGroup,
}

/// Request-level attack bots, one group per named profile.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ResetFloodGroup {
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub count_per_profile: usize,
}

/// Protocol-level attack bots, one group per stream intensity (low, medium, high).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RapidResetGroup {
    #[serde(default)]
    pub intensities: Vec<String>,
    #[serde(default)]
    pub count_per_intensity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProfileConfig {
    pub name: String,
    pub concurrency: usize,
    pub target_rate: u32,
    pub duration_secs: f64,
    #[serde(default)]
    pub reset_probability: f64,
    pub endpoints: Vec<String>,
    pub user_agents: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrowsingConfig {
    #[serde(default = "default_rate_min")]
    pub request_rate_min: f64,
    #[serde(default = "default_rate_max")]
    pub request_rate_max: f64,
    #[serde(default = "default_think_time")]
    pub think_time_secs: [f64; 2],
    #[serde(default = "default_session_gap")]
    pub session_gap_secs: [f64; 2],
    #[serde(default = "default_session_length")]
    pub session_length_secs: [f64; 2],
    #[serde(default = "default_browse_timeout")]
    pub request_timeout_secs: f64,
    #[serde(default = "default_browse_paths")]
    pub paths: Vec<String>,
    #[serde(default = "default_browser_agents")]
    pub user_agents: Vec<String>,
}

impl Default for BrowsingConfig {
    fn default() -> Self {
        Self {
            request_rate_min: default_rate_min(),
            request_rate_max: default_rate_max(),
            think_time_secs: default_think_time(),
            session_gap_secs: default_session_gap(),
            session_length_secs: default_session_length(),
            request_timeout_secs: default_browse_timeout(),
            paths: default_browse_paths(),
            user_agents: default_browser_agents(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamingConfig {
    #[serde(default = "default_sessions_per_bot")]
    pub sessions_per_bot: usize,
    #[serde(default = "default_streaming_timeout")]
    pub timeout_secs: f64,
    #[serde(default = "default_streaming_path")]
    pub path: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            sessions_per_bot: default_sessions_per_bot(),
            timeout_secs: default_streaming_timeout(),
            path: default_streaming_path(),
        }
    }
}

/// Phase plan of one scenario, in seconds. A zero phase is skipped.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub normal_traffic_duration: f64,
    #[serde(default)]
    pub baseline_duration: f64,
    #[serde(default)]
    pub attack_duration: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContinuousConfig {
    #[serde(default = "default_scenario_min")]
    pub scenario_min_secs: f64,
    #[serde(default = "default_scenario_max")]
    pub scenario_max_secs: f64,
    #[serde(default = "default_idle_min")]
    pub idle_min_secs: f64,
    #[serde(default = "default_idle_max")]
    pub idle_max_secs: f64,
}

impl Default for ContinuousConfig {
    fn default() -> Self {
        Self {
            scenario_min_secs: default_scenario_min(),
            scenario_max_secs: default_scenario_max(),
            idle_min_secs: default_idle_min(),
            idle_max_secs: default_idle_max(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9100,
            sample_interval_secs: default_sample_interval(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    /// JSON-lines destination. `-` writes to stdout; absent disables the log.
    #[serde(default)]
    pub path: Option<String>,
    /// Emit `request_start` / `request_end` for every attack unit.
    #[serde(default = "default_true")]
    pub log_requests: bool,
    /// Attach a metrics snapshot to every `request_end`.
    #[serde(default)]
    pub request_snapshots: bool,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            path: None,
            log_requests: true,
            request_snapshots: false,
        }
    }
}

fn default_pool_idle() -> usize {
    100
}

fn default_rate_min() -> f64 {
    0.5
}

fn default_rate_max() -> f64 {
    2.0
}

fn default_think_time() -> [f64; 2] {
    [1.0, 5.0]
}

fn default_session_gap() -> [f64; 2] {
    [10.0, 30.0]
}

fn default_session_length() -> [f64; 2] {
    [30.0, 180.0]
}

fn default_browse_timeout() -> f64 {
    10.0
}

fn default_browse_paths() -> Vec<String> {
    ["/", "/api/fast", "/api/medium", "/api/slow", "/api/data/100", "/api/data/500"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

fn default_browser_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 14_7_1 like Mac OS X)",
        "Mozilla/5.0 (Android 11; Mobile; rv:91.0) Gecko/91.0",
    ]
    .iter()
    .map(|a| a.to_string())
    .collect()
}

fn default_sessions_per_bot() -> usize {
    3
}

fn default_streaming_timeout() -> f64 {
    300.0
}

fn default_streaming_path() -> String {
    "/streaming".to_string()
}

fn default_scenario_min() -> f64 {
    300.0
}

fn default_scenario_max() -> f64 {
    900.0
}

fn default_idle_min() -> f64 {
    10.0
}

fn default_idle_max() -> f64 {
    60.0
}

fn default_sample_interval() -> f64 {
    10.0
}

fn default_true() -> bool {
    true
}
