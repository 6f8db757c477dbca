//! Scenario orchestration.
//!
//! A scenario is a three-phase plan: normal traffic, a quiet baseline, then
//! the attack. The [`Controller`] walks it as
//! `Idle -> NormalTraffic -> BaselineWait -> Attack -> Idle`, skipping any
//! phase whose duration is zero. Benign bots run only in the normal traffic
//! phase and attack bots only in the attack phase; the baseline is a pure
//! delay so samples taken before the attack are clean.
//!
//! [`Controller::stop`] is one-shot: it ends the current phase at each bot's
//! next checkpoint and every later run returns straight away.

use crate::bots::{build_population, duration_range, pause, uniform_duration, Bot, BotContext, BotRole, BotStats};
use crate::engine::aggregator::{MetricsAggregator, MetricsSnapshot};
use crate::engine::profile::secs;
use crate::engine::simulator::build_client;
use crate::engine::target::{targets_from_config, Target};
use crate::error::ConfigurationError;
use crate::events::{Event, EventLog};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use storm_common::{Config, ContinuousConfig, ScenarioConfig};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    NormalTraffic,
    BaselineWait,
    Attack,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::NormalTraffic => "normal_traffic",
            Phase::BaselineWait => "baseline_wait",
            Phase::Attack => "attack",
        }
    }

    /// Bots active during the phase, if any.
    fn role(self) -> Option<BotRole> {
        match self {
            Phase::NormalTraffic => Some(BotRole::BenignSession),
            Phase::Attack => Some(BotRole::AttackStream),
            Phase::Idle | Phase::BaselineWait => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    name: String,
    normal_traffic: Duration,
    baseline: Duration,
    attack: Duration,
}

impl Scenario {
    pub fn new(name: impl Into<String>, normal_traffic: Duration, baseline: Duration, attack: Duration) -> Self {
        Self {
            name: name.into(),
            normal_traffic,
            baseline,
            attack,
        }
    }

    pub fn from_config(name: &str, cfg: &ScenarioConfig) -> Result<Self, ConfigurationError> {
        Ok(Self::new(
            name,
            secs(cfg.normal_traffic_duration)?,
            secs(cfg.baseline_duration)?,
            secs(cfg.attack_duration)?,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn normal_traffic(&self) -> Duration {
        self.normal_traffic
    }

    pub fn baseline(&self) -> Duration {
        self.baseline
    }

    pub fn attack(&self) -> Duration {
        self.attack
    }

    pub fn total(&self) -> Duration {
        self.normal_traffic
            .saturating_add(self.baseline)
            .saturating_add(self.attack)
    }

    /// Phases in execution order, zero-length ones included.
    pub fn phases(&self) -> [(Phase, Duration); 3] {
        [
            (Phase::NormalTraffic, self.normal_traffic),
            (Phase::BaselineWait, self.baseline),
            (Phase::Attack, self.attack),
        ]
    }

    /// Same proportions, stretched or shrunk so the phases sum to `total`.
    /// A scenario with no length is returned unchanged.
    pub fn scaled_to(&self, total: Duration) -> Self {
        let current = self.total().as_secs_f64();
        if current == 0.0 {
            return self.clone();
        }
        let factor = total.as_secs_f64() / current;
        Self {
            name: self.name.clone(),
            normal_traffic: scale(self.normal_traffic, factor),
            baseline: scale(self.baseline, factor),
            attack: scale(self.attack, factor),
        }
    }
}

fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

/// Read-only scenario lookup by name.
#[derive(Debug, Clone, Default)]
pub struct ScenarioRegistry {
    scenarios: BTreeMap<String, Scenario>,
}

impl ScenarioRegistry {
    pub fn new(scenarios: impl IntoIterator<Item = Scenario>) -> Self {
        Self {
            scenarios: scenarios
                .into_iter()
                .map(|s| (s.name.clone(), s))
                .collect(),
        }
    }

    pub fn from_config(cfg: &BTreeMap<String, ScenarioConfig>) -> Result<Self, ConfigurationError> {
        let scenarios = cfg
            .iter()
            .map(|(name, sc)| Scenario::from_config(name, sc))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(scenarios))
    }

    pub fn get(&self, name: &str) -> Result<&Scenario, ConfigurationError> {
        self.scenarios
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownScenario(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.scenarios.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Uniform pick over every registered scenario.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<&Scenario, ConfigurationError> {
        self.scenarios
            .values()
            .choose(rng)
            .ok_or(ConfigurationError::NoScenarios)
    }
}

/// Timing of continuous mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuousSettings {
    pub scenario_total: (Duration, Duration),
    pub idle: (Duration, Duration),
}

impl Default for ContinuousSettings {
    fn default() -> Self {
        Self {
            scenario_total: (Duration::from_secs(300), Duration::from_secs(900)),
            idle: (Duration::from_secs(10), Duration::from_secs(60)),
        }
    }
}

impl ContinuousSettings {
    pub fn from_config(cfg: &ContinuousConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            scenario_total: duration_range("continuous.scenario_secs", [cfg.scenario_min_secs, cfg.scenario_max_secs])?,
            idle: duration_range("continuous.idle_secs", [cfg.idle_min_secs, cfg.idle_max_secs])?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub planned: Duration,
    pub elapsed: Duration,
    /// Final statistics of every bot that ran in the phase, by bot id.
    pub bots: Vec<(String, BotStats)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    /// Executed phases in order. Skipped zero-length phases do not appear.
    pub phases: Vec<PhaseRecord>,
    pub elapsed: Duration,
    pub stopped: bool,
    pub server_metrics: MetricsSnapshot,
}

pub struct Controller {
    bots: Vec<Arc<Bot>>,
    registry: ScenarioRegistry,
    aggregator: Arc<MetricsAggregator>,
    events: EventLog,
    continuous: ContinuousSettings,
    sample_interval: Duration,
    seed: Option<u64>,
    phase: Mutex<Phase>,
    stop: CancellationToken,
}

impl Controller {
    pub fn new(
        bots: Vec<Arc<Bot>>,
        registry: ScenarioRegistry,
        aggregator: Arc<MetricsAggregator>,
        events: EventLog,
    ) -> Self {
        Self {
            bots,
            registry,
            aggregator,
            events,
            continuous: ContinuousSettings::default(),
            sample_interval: Duration::from_secs(10),
            seed: None,
            phase: Mutex::new(Phase::Idle),
            stop: CancellationToken::new(),
        }
    }

    /// Validates the whole configuration and builds the bot population.
    /// Nothing touches the network until a scenario runs.
    pub fn from_config(cfg: &Config, events: EventLog) -> Result<Self, ConfigurationError> {
        let targets: Arc<[Target]> = targets_from_config(&cfg.targets)?.into();
        let registry = ScenarioRegistry::from_config(&cfg.scenarios)?;
        let aggregator = Arc::new(MetricsAggregator::new());
        let ctx = BotContext {
            client: build_client(&cfg.transport),
            aggregator: Arc::clone(&aggregator),
            events: events.clone(),
            seed: cfg.seed,
        };
        let bots = build_population(cfg, targets, &ctx)?;

        Ok(Self::new(bots, registry, aggregator, events)
            .with_continuous(ContinuousSettings::from_config(&cfg.continuous)?)
            .with_sample_interval(secs(cfg.metrics.sample_interval_secs)?)
            .with_seed(cfg.seed))
    }

    pub fn with_continuous(mut self, settings: ContinuousSettings) -> Self {
        self.continuous = settings;
        self
    }

    /// Interval between `metrics_snapshot` events. Zero disables sampling.
    pub fn with_sample_interval(mut self, every: Duration) -> Self {
        self.sample_interval = every;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn bots(&self) -> &[Arc<Bot>] {
        &self.bots
    }

    pub fn registry(&self) -> &ScenarioRegistry {
        &self.registry
    }

    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.aggregator
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn current_phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Stops every bot at its next checkpoint and ends the current run.
    pub fn stop(&self) {
        info!("Controller stop requested");
        self.stop.cancel();
    }

    pub async fn run_scenario(&self, name: &str) -> Result<ScenarioReport, ConfigurationError> {
        let scenario = self.registry.get(name)?.clone();
        self.run(&scenario).await
    }

    /// Runs one scenario end to end. Only an attempt to start a bot that is
    /// still running fails; unit-level failures end up in the aggregator.
    pub async fn run(&self, scenario: &Scenario) -> Result<ScenarioReport, ConfigurationError> {
        let started = Instant::now();
        info!(
            scenario = %scenario.name(),
            normal_traffic_secs = scenario.normal_traffic().as_secs_f64(),
            baseline_secs = scenario.baseline().as_secs_f64(),
            attack_secs = scenario.attack().as_secs_f64(),
            "Scenario starting"
        );
        self.events.emit(Event::ScenarioStart {
            scenario: scenario.name().to_string(),
            normal_traffic_secs: scenario.normal_traffic().as_secs_f64(),
            baseline_secs: scenario.baseline().as_secs_f64(),
            attack_secs: scenario.attack().as_secs_f64(),
            server_metrics: self.aggregator.snapshot(),
        });

        let sampling = self.stop.child_token();
        let sampler = self.spawn_sampler(sampling.clone());

        let mut phases = Vec::new();
        let mut result = Ok(());
        for (phase, planned) in scenario.phases() {
            if planned.is_zero() {
                continue;
            }
            if self.stop.is_cancelled() {
                break;
            }
            match self.run_phase(scenario.name(), phase, planned).await {
                Ok(record) => phases.push(record),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        *self.phase.lock() = Phase::Idle;

        sampling.cancel();
        if let Some(handle) = sampler {
            let _ = handle.await;
        }

        let elapsed = started.elapsed();
        let server_metrics = self.aggregator.snapshot();
        self.events.emit(Event::ScenarioEnd {
            scenario: scenario.name().to_string(),
            duration_secs: elapsed.as_secs_f64(),
            server_metrics: server_metrics.clone(),
        });
        self.events.flush();
        result?;

        info!(
            scenario = %scenario.name(),
            elapsed_secs = elapsed.as_secs_f64(),
            total_requests = server_metrics.total_requests,
            resets = server_metrics.reset_count,
            errors = server_metrics.error_count,
            "Scenario finished"
        );
        Ok(ScenarioReport {
            scenario: scenario.name().to_string(),
            phases,
            elapsed,
            stopped: self.stop.is_cancelled(),
            server_metrics,
        })
    }

    async fn run_phase(&self, scenario: &str, phase: Phase, planned: Duration) -> Result<PhaseRecord, ConfigurationError> {
        let bots: Vec<Arc<Bot>> = match phase.role() {
            Some(role) => self
                .bots
                .iter()
                .filter(|b| b.role() == role)
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        if let Some(busy) = bots.iter().find(|b| b.is_running()) {
            return Err(ConfigurationError::AlreadyRunning(busy.id().to_string()));
        }

        *self.phase.lock() = phase;
        info!(scenario, phase = %phase, secs = planned.as_secs_f64(), bots = bots.len(), "Phase starting");
        self.events.emit(Event::PhaseStart {
            scenario: scenario.to_string(),
            phase: phase.to_string(),
            duration_secs: planned.as_secs_f64(),
            bots: bots.len(),
        });

        let started = Instant::now();
        let stats = if phase.role().is_some() {
            self.run_bots(&bots, planned).await?
        } else {
            pause(&self.stop, planned).await;
            Vec::new()
        };
        let elapsed = started.elapsed();

        self.events.emit(Event::PhaseEnd {
            scenario: scenario.to_string(),
            phase: phase.to_string(),
            elapsed_secs: elapsed.as_secs_f64(),
        });
        Ok(PhaseRecord {
            phase,
            planned,
            elapsed,
            bots: stats,
        })
    }

    /// Runs `bots` concurrently for `duration` and waits for all of them.
    /// A phase with no bots still lasts `duration`.
    async fn run_bots(&self, bots: &[Arc<Bot>], duration: Duration) -> Result<Vec<(String, BotStats)>, ConfigurationError> {
        if bots.is_empty() {
            pause(&self.stop, duration).await;
            return Ok(Vec::new());
        }

        let mut runs = JoinSet::new();
        for bot in bots {
            let bot = Arc::clone(bot);
            let stop = self.stop.clone();
            runs.spawn(async move {
                let stats = bot.run_until(duration, &stop).await;
                (bot.id().to_string(), stats)
            });
        }

        let mut stats = Vec::with_capacity(bots.len());
        let mut refused = None;
        while let Some(joined) = runs.join_next().await {
            match joined {
                Ok((id, Ok(s))) => stats.push((id, s)),
                Ok((id, Err(e))) => {
                    warn!(bot = %id, error = %e, "Bot refused to start");
                    refused.get_or_insert(e);
                }
                Err(e) => warn!(error = %e, "Bot task failed"),
            }
        }
        if let Some(e) = refused {
            return Err(e);
        }
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(stats)
    }

    fn spawn_sampler(&self, token: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.events.is_enabled() || self.sample_interval.is_zero() {
            return None;
        }
        let aggregator = Arc::clone(&self.aggregator);
        let events = self.events.clone();
        let every = self.sample_interval;
        Some(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => events.emit(Event::MetricsSnapshot {
                        server_metrics: aggregator.snapshot(),
                    }),
                    _ = token.cancelled() => break,
                }
            }
        }))
    }

    /// Rotates through randomly chosen scenarios until stopped, or until
    /// `limit` has elapsed. Returns how many scenarios ran.
    pub async fn run_continuous(&self, limit: Option<Duration>) -> Result<u64, ConfigurationError> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.run_continuous_with(limit, &mut rng).await
    }

    /// Continuous mode with an explicit random source.
    ///
    /// Each round picks a scenario uniformly, draws a total length from the
    /// configured range, scales the scenario's phases to it, runs it, then
    /// idles for a random pause. With a `limit`, the last scenario and idle
    /// are cut short so the whole rotation fits inside it.
    pub async fn run_continuous_with<R: Rng + Send + ?Sized>(
        &self,
        limit: Option<Duration>,
        rng: &mut R,
    ) -> Result<u64, ConfigurationError> {
        if self.registry.is_empty() {
            return Err(ConfigurationError::NoScenarios);
        }
        let started = Instant::now();
        let remaining = || limit.map(|l| l.saturating_sub(started.elapsed()));
        let mut completed = 0;

        info!(scenarios = self.registry.len(), limit_secs = limit.map(|l| l.as_secs_f64()), "Continuous mode starting");
        while !self.stop.is_cancelled() {
            let mut total = uniform_duration(rng, self.continuous.scenario_total);
            if let Some(left) = remaining() {
                if left.is_zero() {
                    break;
                }
                total = total.min(left);
            }
            let scenario = self.registry.choose(rng)?.scaled_to(total);
            self.run(&scenario).await?;
            completed += 1;

            let mut idle = uniform_duration(rng, self.continuous.idle);
            if let Some(left) = remaining() {
                idle = idle.min(left);
            }
            info!(completed, idle_secs = idle.as_secs_f64(), "Idling before next scenario");
            if !pause(&self.stop, idle).await {
                break;
            }
        }
        info!(completed, "Continuous mode finished");
        Ok(completed)
    }
}
