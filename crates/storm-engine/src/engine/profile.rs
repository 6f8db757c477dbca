//! Intensity profiles: the validated parameter bundles that shape attack traffic.
//!
//! Two tables live here:
//! - [`ATTACK_PRESETS`]: request-level presets (light, medium, heavy, extreme)
//!   consumed by the batch dispatcher.
//! - [`StreamIntensity`]: protocol-level stream churn (low, medium, high)
//!   consumed by the rapid reset connection.

use crate::error::ConfigurationError;
use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use storm_common::ProfileConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct IntensityProfile {
    name: String,
    concurrency: usize,
    target_rate: u32,
    duration: Duration,
    reset_probability: f64,
    endpoints: Vec<String>,
    user_agents: Vec<String>,
}

impl IntensityProfile {
    /// Builds a profile, rejecting anything outside
    /// `concurrency >= 1`, `target_rate >= 1`, `0 <= reset_probability <= 1`.
    pub fn new(
        name: impl Into<String>,
        concurrency: usize,
        target_rate: u32,
        duration: Duration,
        reset_probability: f64,
        endpoints: Vec<String>,
        user_agents: Vec<String>,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        if concurrency == 0 {
            return Err(ConfigurationError::ZeroConcurrency);
        }
        if target_rate == 0 {
            return Err(ConfigurationError::ZeroRate);
        }
        // NaN fails both comparisons and is rejected here too.
        if !(0.0..=1.0).contains(&reset_probability) {
            return Err(ConfigurationError::ResetProbability(reset_probability));
        }
        if endpoints.is_empty() {
            return Err(ConfigurationError::EmptyCandidates(name, "endpoints"));
        }
        if user_agents.is_empty() {
            return Err(ConfigurationError::EmptyCandidates(name, "user agents"));
        }
        Ok(Self {
            name,
            concurrency,
            target_rate,
            duration,
            reset_probability,
            endpoints,
            user_agents,
        })
    }

    pub fn from_config(cfg: &ProfileConfig) -> Result<Self, ConfigurationError> {
        Self::new(
            cfg.name.clone(),
            cfg.concurrency,
            cfg.target_rate,
            secs(cfg.duration_secs)?,
            cfg.reset_probability,
            cfg.endpoints.clone(),
            cfg.user_agents.clone(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn reset_probability(&self) -> f64 {
        self.reset_probability
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn user_agents(&self) -> &[String] {
        &self.user_agents
    }

    /// Units launched per batch. Clamped to the rate so a loosely configured
    /// concurrency cannot overshoot it.
    pub fn batch_size(&self) -> usize {
        self.concurrency.min(self.target_rate as usize)
    }

    /// Minimum wall-clock time a batch of `batch` units must occupy.
    /// Rounded up to the nanosecond so paced batches never outrun the rate.
    pub fn pacing_window(&self, batch: usize) -> Duration {
        Duration::from_nanos((batch as u64 * 1_000_000_000).div_ceil(u64::from(self.target_rate)))
    }

    /// Upper bound on units issued over the whole duration: `ceil(duration * rate)`.
    pub fn unit_budget(&self) -> u64 {
        (self.duration.as_secs_f64() * self.target_rate as f64).ceil() as u64
    }

    /// Same shape, different run length.
    pub fn with_duration(&self, duration: Duration) -> Self {
        Self {
            duration,
            ..self.clone()
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub(crate) fn secs(value: f64) -> Result<Duration, ConfigurationError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigurationError::InvalidDuration(value))
}

fn preset(
    name: &str,
    concurrency: usize,
    target_rate: u32,
    duration_secs: u64,
    reset_probability: f64,
    endpoints: &[&str],
    user_agents: &[&str],
) -> IntensityProfile {
    IntensityProfile {
        name: name.to_string(),
        concurrency,
        target_rate,
        duration: Duration::from_secs(duration_secs),
        reset_probability,
        endpoints: strings(endpoints),
        user_agents: strings(user_agents),
    }
}

/// Canonical attack presets, escalating in concurrency, rate and reset probability.
pub static ATTACK_PRESETS: Lazy<BTreeMap<&'static str, IntensityProfile>> = Lazy::new(|| {
    let mut presets = BTreeMap::new();
    presets.insert(
        "light",
        preset(
            "Light Rapid Reset",
            20,
            50,
            30,
            0.8,
            &["/api/fast", "/api/medium"],
            &["LightAttacker/1.0", "TestBot/1.0"],
        ),
    );
    presets.insert(
        "medium",
        preset(
            "Medium Rapid Reset",
            50,
            150,
            60,
            0.9,
            &["/api/fast", "/api/medium", "/api/slow"],
            &["MediumAttacker/1.0", "LoadTester/2.0"],
        ),
    );
    presets.insert(
        "heavy",
        preset(
            "Heavy Rapid Reset",
            100,
            300,
            45,
            0.95,
            &["/api/fast", "/api/medium", "/api/slow", "/api/heavy"],
            &["HeavyAttacker/1.0", "StressBot/3.0"],
        ),
    );
    presets.insert(
        "extreme",
        preset(
            "Extreme Rapid Reset",
            200,
            500,
            30,
            0.98,
            &[
                "/api/fast",
                "/api/medium",
                "/api/slow",
                "/api/heavy",
                "/api/data/1000",
            ],
            &["ExtremeAttacker/1.0", "MaxStress/4.0"],
        ),
    );
    presets
});

/// Looks up a profile by key, preferring custom definitions over presets.
pub fn resolve_profile(
    key: &str,
    custom: &BTreeMap<String, ProfileConfig>,
) -> Result<IntensityProfile, ConfigurationError> {
    if let Some(cfg) = custom.get(key) {
        return IntensityProfile::from_config(cfg);
    }
    ATTACK_PRESETS
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigurationError::UnknownProfile(key.to_string()))
}

/// Protocol-level churn intensity for the rapid reset connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamIntensity {
    Low,
    Medium,
    High,
}

impl StreamIntensity {
    pub fn streams_per_connection(self) -> u64 {
        match self {
            StreamIntensity::Low => 100,
            StreamIntensity::Medium => 1_000,
            StreamIntensity::High => 10_000,
        }
    }

    /// Delay between a stream's HEADERS frame and its RST_STREAM.
    pub fn reset_delay(self) -> Duration {
        match self {
            StreamIntensity::Low => Duration::from_millis(10),
            StreamIntensity::Medium => Duration::from_millis(1),
            StreamIntensity::High => Duration::from_micros(100),
        }
    }

    /// Persistent connections held open concurrently by one bot.
    pub fn connections(self) -> usize {
        match self {
            StreamIntensity::High => 5,
            _ => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StreamIntensity::Low => "low",
            StreamIntensity::Medium => "medium",
            StreamIntensity::High => "high",
        }
    }
}

impl fmt::Display for StreamIntensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamIntensity {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(StreamIntensity::Low),
            "medium" => Ok(StreamIntensity::Medium),
            "high" => Ok(StreamIntensity::High),
            _ => Err(ConfigurationError::UnknownIntensity(s.to_string())),
        }
    }
}
