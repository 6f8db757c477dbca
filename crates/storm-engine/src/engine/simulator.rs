//! Request-level unit of work: one GET that is either allowed to complete or
//! abandoned after a very short timeout.
//!
//! Abandoning a request drops the in-flight hyper future. Over HTTP/2 that makes
//! the client emit RST_STREAM for the stream, which is the rapid reset pattern;
//! over HTTP/1.1 the connection is torn down instead.
//!
//! Randomness is injected through [`RequestSimulator::plan`] so callers (and
//! tests) control which units run in reset mode.

use crate::engine::profile::IntensityProfile;
use crate::engine::target::Target;
use crate::error::UnitError;
use hyper::client::HttpConnector;
use hyper::header::{ACCEPT, USER_AGENT};
use hyper::{Body, Client, Method, Request};
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use storm_common::TransportConfig;
use tokio::time::{timeout, Instant};
use tracing::debug;

/// Timeout for units that are meant to be reset before the target answers.
pub const RESET_TIMEOUT: Duration = Duration::from_millis(50);
/// Timeout for units that are meant to complete.
pub const NORMAL_TIMEOUT: Duration = Duration::from_secs(5);

pub type HttpClient = Client<HttpConnector, Body>;

pub fn build_client(cfg: &TransportConfig) -> HttpClient {
    let mut connector = HttpConnector::new();
    connector.set_nodelay(true);
    connector.set_connect_timeout(Some(NORMAL_TIMEOUT));
    Client::builder()
        .http2_only(cfg.http2_only)
        .pool_max_idle_per_host(cfg.pool_max_idle_per_host)
        .build(connector)
}

/// Plain GET with the given user agent and accept header.
pub fn get_request(url: &str, user_agent: &str, accept: &str) -> Result<Request<Body>, UnitError> {
    Request::builder()
        .method(Method::GET)
        .uri(url)
        .header(USER_AGENT, user_agent)
        .header(ACCEPT, accept)
        .body(Body::empty())
        .map_err(|e| UnitError::Transport(e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitMode {
    /// Abort after the short timeout; a timeout is the intended result.
    Reset,
    /// Let the request run and read the full body.
    Normal,
}

impl UnitMode {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitMode::Reset => "reset",
            UnitMode::Normal => "normal",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnitPlan {
    pub target: Target,
    pub path: String,
    pub user_agent: String,
    pub mode: UnitMode,
}

impl UnitPlan {
    pub fn url(&self) -> String {
        self.target.url_for(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        status: u16,
        bytes: u64,
        latency: Duration,
    },
    /// Timed out in reset mode, as intended.
    Reset { elapsed: Duration },
    Errored(UnitError),
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Completed { .. } => "completed",
            Outcome::Reset { .. } => "reset",
            Outcome::Errored(_) => "errored",
        }
    }
}

#[derive(Clone)]
pub struct RequestSimulator {
    client: HttpClient,
    targets: Arc<[Target]>,
    profile: Arc<IntensityProfile>,
    reset_timeout: Duration,
    normal_timeout: Duration,
}

impl RequestSimulator {
    /// `targets` must be non-empty; configuration loading guarantees it.
    pub fn new(client: HttpClient, targets: Arc<[Target]>, profile: Arc<IntensityProfile>) -> Self {
        Self {
            client,
            targets,
            profile,
            reset_timeout: RESET_TIMEOUT,
            normal_timeout: NORMAL_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, reset: Duration, normal: Duration) -> Self {
        self.reset_timeout = reset;
        self.normal_timeout = normal;
        self
    }

    pub fn profile(&self) -> &IntensityProfile {
        &self.profile
    }

    pub fn timeout_for(&self, mode: UnitMode) -> Duration {
        match mode {
            UnitMode::Reset => self.reset_timeout,
            UnitMode::Normal => self.normal_timeout,
        }
    }

    /// Picks target, path and user agent uniformly, then draws the reset decision.
    pub fn plan<R: Rng + ?Sized>(&self, rng: &mut R) -> UnitPlan {
        let target = self
            .targets
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| self.targets[0].clone());
        let path = self
            .profile
            .endpoints()
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| "/".to_string());
        let user_agent = self
            .profile
            .user_agents()
            .choose(rng)
            .cloned()
            .unwrap_or_default();
        let mode = if rng.gen::<f64>() < self.profile.reset_probability() {
            UnitMode::Reset
        } else {
            UnitMode::Normal
        };
        UnitPlan {
            target,
            path,
            user_agent,
            mode,
        }
    }

    /// Runs one unit. Never retries and never returns an error: failures are
    /// folded into [`Outcome::Errored`].
    pub async fn execute(&self, plan: &UnitPlan) -> Outcome {
        let request = match get_request(&plan.url(), &plan.user_agent, "application/json") {
            Ok(r) => r,
            Err(e) => return Outcome::Errored(e),
        };

        let limit = self.timeout_for(plan.mode);
        let started = Instant::now();
        let exchange = async {
            let response = self.client.request(request).await?;
            let status = response.status().as_u16();
            let bytes = match plan.mode {
                UnitMode::Normal => hyper::body::to_bytes(response.into_body()).await?.len() as u64,
                UnitMode::Reset => 0,
            };
            Ok::<_, hyper::Error>((status, bytes))
        };

        match timeout(limit, exchange).await {
            Ok(Ok((status, bytes))) => Outcome::Completed {
                status,
                bytes,
                latency: started.elapsed(),
            },
            Ok(Err(e)) => {
                debug!(url = %plan.url(), error = %e, "Unit transport failure");
                Outcome::Errored(UnitError::Transport(e.to_string()))
            }
            Err(_) => match plan.mode {
                UnitMode::Reset => Outcome::Reset {
                    elapsed: started.elapsed(),
                },
                UnitMode::Normal => Outcome::Errored(UnitError::TimeoutUnexpected(limit)),
            },
        }
    }
}
