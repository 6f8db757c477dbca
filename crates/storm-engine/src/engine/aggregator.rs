//! Process-wide traffic counters shared by every bot and dispatcher.
//!
//! Two kinds of state with different lifetimes:
//! - a fixed-capacity rolling window of recent requests (timestamp, latency, size),
//!   evicting oldest-first, used for "recent" figures such as requests per minute;
//! - unbounded cumulative counters (totals, per-client, per-user-agent, errors,
//!   resets) that never shrink.
//!
//! Everything `record_request` touches lives in one `Ledger` behind a single
//! short critical section, so a snapshot is one consistent cut: the per-client
//! and per-user-agent counts always sum to the request total. Error, reset and
//! in-flight counters are independent atomics.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const ROLLING_CAPACITY: usize = 1000;

const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestSample {
    pub at: Instant,
    pub latency: Duration,
    pub size_bytes: u64,
}

struct Ledger {
    samples: VecDeque<RequestSample>,
    capacity: usize,
    total_requests: u64,
    total_bytes: u64,
    clients: HashMap<String, u64>,
    user_agents: HashMap<String, u64>,
}

impl Ledger {
    fn push(&mut self, client_id: &str, user_agent: &str, sample: RequestSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.total_requests += 1;
        self.total_bytes += sample.size_bytes;
        bump(&mut self.clients, client_id);
        bump(&mut self.user_agents, user_agent);
    }
}

fn bump(counts: &mut HashMap<String, u64>, key: &str) {
    match counts.get_mut(key) {
        Some(n) => *n += 1,
        None => {
            counts.insert(key.to_string(), 1);
        }
    }
}

/// Point-in-time view computed from the aggregator's current state.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub uptime_secs: f64,
    pub total_requests: u64,
    /// Requests currently held in the rolling window.
    pub recent_requests: usize,
    /// Requests in the rolling window younger than 60 seconds.
    pub requests_per_minute: usize,
    pub total_bytes: u64,
    pub requests_by_client: BTreeMap<String, u64>,
    pub requests_by_user_agent: BTreeMap<String, u64>,
    pub unique_clients: usize,
    pub unique_user_agents: usize,
    pub error_count: u64,
    pub reset_count: u64,
    pub concurrent_requests: usize,
    pub avg_response_time_ms: f64,
}

pub struct MetricsAggregator {
    ledger: Mutex<Ledger>,
    errors: AtomicU64,
    resets: AtomicU64,
    in_flight: AtomicUsize,
    started: Instant,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::with_capacity(ROLLING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ledger: Mutex::new(Ledger {
                samples: VecDeque::with_capacity(capacity),
                capacity,
                total_requests: 0,
                total_bytes: 0,
                clients: HashMap::new(),
                user_agents: HashMap::new(),
            }),
            errors: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            started: Instant::now(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ledger.lock().capacity
    }

    pub fn record_request(&self, client_id: &str, user_agent: &str, size_bytes: u64, latency: Duration) {
        let sample = RequestSample {
            at: Instant::now(),
            latency,
            size_bytes,
        };
        self.ledger.lock().push(client_id, user_agent, sample);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks one unit in flight until the returned guard is dropped.
    pub fn track_in_flight(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            aggregator: Arc::clone(self),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    pub fn total_requests(&self) -> u64 {
        self.ledger.lock().total_requests
    }

    /// Copy of the rolling window, oldest first.
    pub fn recent_samples(&self) -> Vec<RequestSample> {
        self.ledger.lock().samples.iter().copied().collect()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Instant::now();
        let (total_requests, total_bytes, recent_requests, requests_per_minute, latency_sum, by_client, by_agent) = {
            let ledger = self.ledger.lock();
            let per_minute = ledger
                .samples
                .iter()
                .filter(|s| now.duration_since(s.at) < RATE_WINDOW)
                .count();
            let latency_sum: Duration = ledger.samples.iter().map(|s| s.latency).sum();
            (
                ledger.total_requests,
                ledger.total_bytes,
                ledger.samples.len(),
                per_minute,
                latency_sum,
                ledger.clients.clone(),
                ledger.user_agents.clone(),
            )
        };

        let avg_response_time_ms = if recent_requests == 0 {
            0.0
        } else {
            latency_sum.as_secs_f64() * 1000.0 / recent_requests as f64
        };

        let requests_by_client: BTreeMap<String, u64> = by_client.into_iter().collect();
        let requests_by_user_agent: BTreeMap<String, u64> = by_agent.into_iter().collect();

        MetricsSnapshot {
            uptime_secs: now.duration_since(self.started).as_secs_f64(),
            total_requests,
            recent_requests,
            requests_per_minute,
            total_bytes,
            unique_clients: requests_by_client.len(),
            unique_user_agents: requests_by_user_agent.len(),
            requests_by_client,
            requests_by_user_agent,
            error_count: self.error_count(),
            reset_count: self.reset_count(),
            concurrent_requests: self.in_flight(),
            avg_response_time_ms,
        }
    }
}

pub struct InFlightGuard {
    aggregator: Arc<MetricsAggregator>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.aggregator.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
