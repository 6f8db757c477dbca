//! Long-lived traffic agents.
//!
//! A [`Bot`] is created once at setup and reused across phases. Each call to
//! [`Bot::run`] is one run: it refuses to start while a previous run is still
//! live, resets the per-run statistics, spawns the loops its [`BotKind`]
//! requires, and returns once the duration elapses (or [`Bot::stop`] is
//! called) and every loop has reached its next checkpoint and exited.
//!
//! Stop checkpoints per kind:
//! - web browser: top of each session and top of each page view; think-time
//!   and between-session pauses end early on stop.
//! - streaming: top of each session and each received chunk.
//! - reset flood: each dispatcher batch boundary (see `engine::dispatcher`).
//! - rapid reset: top of each connection cycle and each stream.

pub mod browser;
pub mod flood;
pub mod rapid_reset;
pub mod streaming;

use crate::engine::aggregator::MetricsAggregator;
use crate::engine::profile::{resolve_profile, secs, IntensityProfile, StreamIntensity};
use crate::engine::simulator::HttpClient;
use crate::engine::target::Target;
use crate::error::ConfigurationError;
use crate::events::{Event, EventLog};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storm_common::{BrowsingConfig, Config, StreamingConfig};
use tokio::task::JoinSet;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Roughly 30 years; stands in for deadlines that would overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BotRole {
    BenignSession,
    AttackStream,
}

impl fmt::Display for BotRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotRole::BenignSession => f.write_str("benign_session"),
            BotRole::AttackStream => f.write_str("attack_stream"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrowsingProfile {
    /// Upper bound on this bot's page views per second.
    pub request_rate: f64,
    pub think_time: (Duration, Duration),
    pub session_gap: (Duration, Duration),
    pub session_length: (Duration, Duration),
    pub request_timeout: Duration,
    pub paths: Arc<[String]>,
    pub user_agents: Arc<[String]>,
}

impl BrowsingProfile {
    /// Validates the config and draws this bot's request rate from its range.
    pub fn from_config<R: Rng + ?Sized>(cfg: &BrowsingConfig, rng: &mut R) -> Result<Self, ConfigurationError> {
        let rate_range = range("request_rate", cfg.request_rate_min, cfg.request_rate_max)?;
        if rate_range.0 <= 0.0 {
            return Err(ConfigurationError::InvalidRange(
                "request_rate",
                cfg.request_rate_min,
                cfg.request_rate_max,
            ));
        }
        if cfg.paths.is_empty() {
            return Err(ConfigurationError::EmptyCandidates("browsing".into(), "paths"));
        }
        if cfg.user_agents.is_empty() {
            return Err(ConfigurationError::EmptyCandidates("browsing".into(), "user agents"));
        }
        Ok(Self {
            request_rate: uniform_f64(rng, rate_range),
            think_time: duration_range("think_time_secs", cfg.think_time_secs)?,
            session_gap: duration_range("session_gap_secs", cfg.session_gap_secs)?,
            session_length: duration_range("session_length_secs", cfg.session_length_secs)?,
            request_timeout: secs(cfg.request_timeout_secs)?,
            paths: cfg.paths.clone().into(),
            user_agents: cfg.user_agents.clone().into(),
        })
    }

    /// Minimum spacing between page views implied by `request_rate`. A rate
    /// that is not a positive finite number adds no spacing beyond think time.
    pub fn min_interval(&self) -> Duration {
        if self.request_rate > 0.0 {
            Duration::try_from_secs_f64(self.request_rate.recip()).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamingProfile {
    pub sessions: usize,
    pub timeout: Duration,
    pub path: String,
}

impl StreamingProfile {
    pub fn from_config(cfg: &StreamingConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            sessions: cfg.sessions_per_bot.max(1),
            timeout: secs(cfg.timeout_secs)?,
            path: cfg.path.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BotKind {
    WebBrowser(BrowsingProfile),
    Streaming(StreamingProfile),
    /// Request-level attack driven through the batch dispatcher.
    ResetFlood(Arc<IntensityProfile>),
    /// Protocol-level HEADERS + RST_STREAM churn.
    RapidReset(StreamIntensity),
}

impl BotKind {
    pub fn role(&self) -> BotRole {
        match self {
            BotKind::WebBrowser(_) | BotKind::Streaming(_) => BotRole::BenignSession,
            BotKind::ResetFlood(_) | BotKind::RapidReset(_) => BotRole::AttackStream,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            BotKind::WebBrowser(_) => "web_browser",
            BotKind::Streaming(_) => "streaming",
            BotKind::ResetFlood(_) => "reset_flood",
            BotKind::RapidReset(_) => "rapid_reset",
        }
    }
}

/// Statistics of the current (or most recent) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BotStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub resets: u64,
    pub start_time: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct BotCounters {
    requests_sent: AtomicU64,
    responses_received: AtomicU64,
    errors: AtomicU64,
    resets: AtomicU64,
}

impl BotCounters {
    fn clear(&self) {
        self.requests_sent.store(0, Ordering::SeqCst);
        self.responses_received.store(0, Ordering::SeqCst);
        self.errors.store(0, Ordering::SeqCst);
        self.resets.store(0, Ordering::SeqCst);
    }
}

/// Collaborators every bot shares.
#[derive(Clone)]
pub struct BotContext {
    pub client: HttpClient,
    pub aggregator: Arc<MetricsAggregator>,
    pub events: EventLog,
    pub seed: Option<u64>,
}

pub struct Bot {
    id: String,
    kind: BotKind,
    targets: Arc<[Target]>,
    ctx: BotContext,
    running: AtomicBool,
    stop: Mutex<CancellationToken>,
    counters: BotCounters,
    started_at: Mutex<Option<DateTime<Utc>>>,
    request_seq: AtomicU64,
    runs: AtomicU64,
}

impl Bot {
    pub fn new(id: impl Into<String>, kind: BotKind, targets: Arc<[Target]>, ctx: BotContext) -> Self {
        Self {
            id: id.into(),
            kind,
            targets,
            ctx,
            running: AtomicBool::new(false),
            stop: Mutex::new(CancellationToken::new()),
            counters: BotCounters::default(),
            started_at: Mutex::new(None),
            request_seq: AtomicU64::new(0),
            runs: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &BotKind {
        &self.kind
    }

    pub fn role(&self) -> BotRole {
        self.kind.role()
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub(crate) fn shared_targets(&self) -> Arc<[Target]> {
        Arc::clone(&self.targets)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> BotStats {
        BotStats {
            requests_sent: self.counters.requests_sent.load(Ordering::SeqCst),
            responses_received: self.counters.responses_received.load(Ordering::SeqCst),
            errors: self.counters.errors.load(Ordering::SeqCst),
            resets: self.counters.resets.load(Ordering::SeqCst),
            start_time: *self.started_at.lock(),
        }
    }

    /// Asks the current run to wind down. Returns immediately; the run's
    /// future resolves once every loop has exited.
    pub fn stop(&self) {
        self.stop.lock().cancel();
    }

    /// Runs the bot for `duration`, or until stopped.
    ///
    /// Fails with [`ConfigurationError::AlreadyRunning`] before touching the
    /// network if a previous run has not finished.
    pub async fn run(self: &Arc<Self>, duration: Duration) -> Result<BotStats, ConfigurationError> {
        self.run_until(duration, &CancellationToken::new()).await
    }

    /// As [`Bot::run`], but the run also ends when `parent` is cancelled,
    /// including when it already was before the run began.
    pub async fn run_until(
        self: &Arc<Self>,
        duration: Duration,
        parent: &CancellationToken,
    ) -> Result<BotStats, ConfigurationError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ConfigurationError::AlreadyRunning(self.id.clone()));
        }

        let token = parent.child_token();
        *self.stop.lock() = token.clone();
        self.counters.clear();
        *self.started_at.lock() = Some(Utc::now());
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        let deadline = deadline_after(Instant::now(), duration);

        info!(
            bot = %self.id,
            kind = self.kind.label(),
            duration_secs = duration.as_secs_f64(),
            "Bot starting"
        );

        let mut loops = JoinSet::new();
        match &self.kind {
            BotKind::WebBrowser(profile) => {
                loops.spawn(browser::run_sessions(
                    Arc::clone(self),
                    profile.clone(),
                    token.clone(),
                    self.loop_rng(run, 0),
                ));
            }
            BotKind::Streaming(profile) => {
                for i in 0..profile.sessions {
                    loops.spawn(streaming::run_sessions(
                        Arc::clone(self),
                        profile.clone(),
                        token.clone(),
                        self.loop_rng(run, i as u64),
                    ));
                }
            }
            BotKind::ResetFlood(profile) => {
                loops.spawn(flood::run_bursts(
                    Arc::clone(self),
                    Arc::clone(profile),
                    deadline,
                    token.clone(),
                    self.loop_rng(run, 0),
                ));
            }
            BotKind::RapidReset(intensity) => {
                for i in 0..intensity.connections() {
                    loops.spawn(rapid_reset::run_connection(
                        Arc::clone(self),
                        *intensity,
                        token.clone(),
                        self.loop_rng(run, i as u64),
                    ));
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {}
            _ = token.cancelled() => {}
        }
        token.cancel();

        while let Some(joined) = loops.join_next().await {
            if let Err(e) = joined {
                warn!(bot = %self.id, error = %e, "Bot loop failed");
            }
        }
        self.running.store(false, Ordering::SeqCst);

        let stats = self.stats();
        info!(
            bot = %self.id,
            requests_sent = stats.requests_sent,
            responses = stats.responses_received,
            errors = stats.errors,
            resets = stats.resets,
            "Bot finished"
        );
        Ok(stats)
    }

    fn loop_rng(&self, run: u64, index: u64) -> StdRng {
        match self.ctx.seed {
            Some(seed) => {
                let mut hasher = DefaultHasher::new();
                self.id.hash(&mut hasher);
                run.hash(&mut hasher);
                index.hash(&mut hasher);
                StdRng::seed_from_u64(seed ^ hasher.finish())
            }
            None => StdRng::from_entropy(),
        }
    }

    pub(crate) fn context(&self) -> &BotContext {
        &self.ctx
    }

    pub(crate) fn next_request_id(&self) -> String {
        let n = self.request_seq.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", self.id, n)
    }

    pub(crate) fn record_sent(&self) {
        self.counters.requests_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_response(&self, user_agent: &str, size_bytes: u64, latency: Duration) {
        self.counters.responses_received.fetch_add(1, Ordering::SeqCst);
        self.ctx
            .aggregator
            .record_request(&self.id, user_agent, size_bytes, latency);
    }

    pub(crate) fn record_reset(&self) {
        self.counters.resets.fetch_add(1, Ordering::SeqCst);
        self.ctx.aggregator.record_reset();
    }

    pub(crate) fn record_error(&self, request_id: Option<String>, endpoint: Option<String>, error_type: &str, message: String) {
        self.counters.errors.fetch_add(1, Ordering::SeqCst);
        self.ctx.aggregator.record_error();
        self.ctx.events.emit(Event::Error {
            bot_id: self.id.clone(),
            request_id,
            endpoint,
            error_type: error_type.to_string(),
            error_message: message,
        });
    }
}

/// `start + duration`, saturating at a far-future instant instead of overflowing.
pub(crate) fn deadline_after(start: Instant, duration: Duration) -> Instant {
    start
        .checked_add(duration)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Sleeps for `delay` unless `stop` fires first. Returns `false` when stopped.
pub(crate) async fn pause(stop: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = sleep(delay) => !stop.is_cancelled(),
        _ = stop.cancelled() => false,
    }
}

fn uniform_f64<R: Rng + ?Sized>(rng: &mut R, (lo, hi): (f64, f64)) -> f64 {
    if hi <= lo {
        lo
    } else {
        rng.gen_range(lo..hi)
    }
}

pub(crate) fn uniform_duration<R: Rng + ?Sized>(rng: &mut R, (lo, hi): (Duration, Duration)) -> Duration {
    if hi <= lo {
        lo
    } else {
        rng.gen_range(lo..hi)
    }
}

fn range(what: &'static str, lo: f64, hi: f64) -> Result<(f64, f64), ConfigurationError> {
    if !(lo.is_finite() && hi.is_finite()) || lo < 0.0 || hi < lo {
        return Err(ConfigurationError::InvalidRange(what, lo, hi));
    }
    Ok((lo, hi))
}

pub(crate) fn duration_range(what: &'static str, [lo, hi]: [f64; 2]) -> Result<(Duration, Duration), ConfigurationError> {
    let (lo, hi) = range(what, lo, hi)?;
    Ok((secs(lo)?, secs(hi)?))
}

/// Builds every bot the population config asks for, validating all of it
/// before returning.
pub fn build_population(
    cfg: &Config,
    targets: Arc<[Target]>,
    ctx: &BotContext,
) -> Result<Vec<Arc<Bot>>, ConfigurationError> {
    if targets.is_empty() {
        return Err(ConfigurationError::NoTargets);
    }
    let mut rng = match ctx.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let population = &cfg.population;
    let mut bots = Vec::new();

    for i in 0..population.web_browser_count {
        let profile = BrowsingProfile::from_config(&cfg.browsing, &mut rng)?;
        bots.push(Bot::new(
            format!("web_{}", i),
            BotKind::WebBrowser(profile),
            Arc::clone(&targets),
            ctx.clone(),
        ));
    }

    let streaming = StreamingProfile::from_config(&cfg.streaming)?;
    for i in 0..population.streaming_count {
        bots.push(Bot::new(
            format!("stream_{}", i),
            BotKind::Streaming(streaming.clone()),
            Arc::clone(&targets),
            ctx.clone(),
        ));
    }

    for key in &population.reset_flood.profiles {
        let profile = Arc::new(resolve_profile(key, &cfg.profiles)?);
        for j in 0..population.reset_flood.count_per_profile {
            bots.push(Bot::new(
                format!("flood_{}_{}", key, j),
                BotKind::ResetFlood(Arc::clone(&profile)),
                Arc::clone(&targets),
                ctx.clone(),
            ));
        }
    }

    for name in &population.rapid_reset.intensities {
        let intensity: StreamIntensity = name.parse()?;
        for j in 0..population.rapid_reset.count_per_intensity {
            bots.push(Bot::new(
                format!("attack_{}_{}", intensity, j),
                BotKind::RapidReset(intensity),
                Arc::clone(&targets),
                ctx.clone(),
            ));
        }
    }

    Ok(bots.into_iter().map(Arc::new).collect())
}
