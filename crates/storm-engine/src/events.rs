//! Labeled event log: one JSON object per line, each with an RFC 3339
//! `timestamp` and an `event_type` discriminator. Downstream tooling keys
//! on these names, so renaming a variant is a format change.

use crate::engine::aggregator::MetricsSnapshot;
use crate::engine::profile::IntensityProfile;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use storm_common::EventsConfig;
use tracing::warn;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AttackShape {
    pub name: String,
    pub concurrent_streams: usize,
    pub request_rate: u32,
    pub duration_seconds: f64,
    pub reset_probability: f64,
    pub endpoints: Vec<String>,
    pub user_agents: Vec<String>,
}

impl From<&IntensityProfile> for AttackShape {
    fn from(p: &IntensityProfile) -> Self {
        Self {
            name: p.name().to_string(),
            concurrent_streams: p.concurrency(),
            request_rate: p.target_rate(),
            duration_seconds: p.duration().as_secs_f64(),
            reset_probability: p.reset_probability(),
            endpoints: p.endpoints().to_vec(),
            user_agents: p.user_agents().to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum Event {
    ScenarioStart {
        scenario: String,
        normal_traffic_secs: f64,
        baseline_secs: f64,
        attack_secs: f64,
        server_metrics: MetricsSnapshot,
    },
    ScenarioEnd {
        scenario: String,
        duration_secs: f64,
        server_metrics: MetricsSnapshot,
    },
    PhaseStart {
        scenario: String,
        phase: String,
        duration_secs: f64,
        bots: usize,
    },
    PhaseEnd {
        scenario: String,
        phase: String,
        elapsed_secs: f64,
    },
    AttackStart {
        bot_id: String,
        attack_name: String,
        config: AttackShape,
    },
    AttackEnd {
        bot_id: String,
        attack_name: String,
        total_requests: u64,
        completed: u64,
        resets: u64,
        errors: u64,
        duration_seconds: f64,
        server_metrics: MetricsSnapshot,
    },
    RequestStart {
        request_id: String,
        bot_id: String,
        url: String,
        endpoint: String,
        user_agent: String,
        mode: String,
    },
    RequestEnd {
        request_id: String,
        bot_id: String,
        endpoint: String,
        outcome: String,
        status_code: Option<u16>,
        response_time_ms: f64,
        response_size: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        server_metrics: Option<MetricsSnapshot>,
    },
    NormalRequest {
        request_id: String,
        bot_id: String,
        url: String,
        endpoint: String,
        status_code: u16,
        response_time_ms: f64,
        response_size: u64,
        user_agent: String,
        session_time_secs: f64,
    },
    Error {
        bot_id: String,
        request_id: Option<String>,
        endpoint: Option<String>,
        error_type: String,
        error_message: String,
    },
    StreamProgress {
        bot_id: String,
        target: String,
        intensity: String,
        streams_created: u64,
        streams_reset: u64,
        attack_duration: f64,
    },
    StreamingProgress {
        bot_id: String,
        url: String,
        chunks_received: u64,
        session_duration: f64,
        chunk_size: usize,
    },
    MetricsSnapshot {
        server_metrics: MetricsSnapshot,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ScenarioStart { .. } => "scenario_start",
            Event::ScenarioEnd { .. } => "scenario_end",
            Event::PhaseStart { .. } => "phase_start",
            Event::PhaseEnd { .. } => "phase_end",
            Event::AttackStart { .. } => "attack_start",
            Event::AttackEnd { .. } => "attack_end",
            Event::RequestStart { .. } => "request_start",
            Event::RequestEnd { .. } => "request_end",
            Event::NormalRequest { .. } => "normal_request",
            Event::Error { .. } => "error",
            Event::StreamProgress { .. } => "stream_progress",
            Event::StreamingProgress { .. } => "streaming_progress",
            Event::MetricsSnapshot { .. } => "metrics_snapshot",
        }
    }
}

#[derive(Serialize)]
struct Record<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a Event,
}

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

#[derive(Clone)]
pub struct EventLog {
    sink: Option<Sink>,
    log_requests: bool,
    request_snapshots: bool,
}

impl EventLog {
    pub fn disabled() -> Self {
        Self {
            sink: None,
            log_requests: false,
            request_snapshots: false,
        }
    }

    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            sink: Some(Arc::new(Mutex::new(Box::new(writer)))),
            log_requests: true,
            request_snapshots: false,
        }
    }

    pub fn stdout() -> Self {
        Self::from_writer(io::stdout())
    }

    /// Appends to `path`, creating parent directories as needed.
    pub fn to_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    /// In-memory log for inspection, e.g. from tests.
    pub fn memory() -> (Self, MemorySink) {
        let sink = MemorySink::default();
        (Self::from_writer(sink.clone()), sink)
    }

    pub fn from_config(cfg: &EventsConfig) -> io::Result<Self> {
        let log = match cfg.path.as_deref() {
            None => return Ok(Self::disabled()),
            Some("-") => Self::stdout(),
            Some(path) => Self::to_file(path)?,
        };
        Ok(log
            .with_request_logging(cfg.log_requests)
            .with_request_snapshots(cfg.request_snapshots))
    }

    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.log_requests = enabled;
        self
    }

    pub fn with_request_snapshots(mut self, enabled: bool) -> Self {
        self.request_snapshots = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    pub fn logs_requests(&self) -> bool {
        self.is_enabled() && self.log_requests
    }

    pub fn wants_request_snapshots(&self) -> bool {
        self.logs_requests() && self.request_snapshots
    }

    pub fn emit(&self, event: Event) {
        let Some(sink) = &self.sink else {
            return;
        };
        let record = Record {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            event: &event,
        };
        let line = match serde_json::to_string(&record) {
            Ok(l) => l,
            Err(e) => {
                warn!(event = event.kind(), error = %e, "Failed to encode event");
                return;
            }
        };
        let mut out = sink.lock();
        if let Err(e) = writeln!(out, "{}", line) {
            warn!(event = event.kind(), error = %e, "Failed to write event");
        }
    }

    pub fn flush(&self) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.lock().flush() {
                warn!(error = %e, "Failed to flush event log");
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct MemorySink(Arc<Mutex<Vec<u8>>>);

impl MemorySink {
    /// Every line written so far, parsed back as JSON.
    pub fn records(&self) -> Vec<serde_json::Value> {
        let data = self.0.lock();
        String::from_utf8_lossy(&data)
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }

    /// Records whose `event_type` equals `kind`.
    pub fn of_kind(&self, kind: &str) -> Vec<serde_json::Value> {
        self.records()
            .into_iter()
            .filter(|r| r["event_type"] == kind)
            .collect()
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
