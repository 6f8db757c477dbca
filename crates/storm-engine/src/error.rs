use std::io;
use std::time::Duration;
use thiserror::Error;

/// Fatal setup-time errors. Raised before any network activity begins.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("reset probability {0} is outside [0, 1]")]
    ResetProbability(f64),
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("target rate must be at least 1 unit/s")]
    ZeroRate,
    #[error("duration must be finite and non-negative, got {0}")]
    InvalidDuration(f64),
    #[error("profile `{0}` has no candidate {1}")]
    EmptyCandidates(String, &'static str),
    #[error("unknown intensity profile `{0}`")]
    UnknownProfile(String),
    #[error("unknown stream intensity `{0}` (expected low, medium or high)")]
    UnknownIntensity(String),
    #[error("unknown scenario `{0}`")]
    UnknownScenario(String),
    #[error("scenario registry is empty")]
    NoScenarios,
    #[error("no targets configured")]
    NoTargets,
    #[error("invalid target `{name}`: {reason}")]
    InvalidTarget { name: String, reason: String },
    #[error("invalid range for {0}: [{1}, {2}]")]
    InvalidRange(&'static str, f64, f64),
    #[error("bot `{0}` is already running")]
    AlreadyRunning(String),
}

/// Per-unit failure. Recorded in outcomes and counters, never propagated.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum UnitError {
    #[error("no response within {0:?}")]
    TimeoutUnexpected(Duration),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failures of the protocol-level rapid reset connection.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream id {id} reused on open connection (last sent {last})")]
    StreamIdReuse { id: u32, last: u32 },
    #[error("stream id space exhausted")]
    StreamIdExhausted,
    #[error("{0} timed out")]
    Timeout(&'static str),
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
}
