use crate::engine::aggregator::{MetricsAggregator, MetricsSnapshot};
use prometheus::{Encoder, Gauge, IntGauge, Registry, TextEncoder};

/// Prometheus view of a [`MetricsAggregator`]. Gauges are refreshed from a
/// fresh snapshot on every render, so scrapes never see stale values.
pub struct MetricsExporter {
    registry: Registry,
    total_requests: IntGauge,
    requests_per_minute: IntGauge,
    total_bytes: IntGauge,
    unique_clients: IntGauge,
    unique_user_agents: IntGauge,
    errors: IntGauge,
    resets: IntGauge,
    in_flight: IntGauge,
    avg_response_time: Gauge,
    uptime: Gauge,
}

impl MetricsExporter {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let int_gauge = |name: &str, help: &str| -> Result<IntGauge, prometheus::Error> {
            let gauge = IntGauge::new(name, help)?;
            registry.register(Box::new(gauge.clone()))?;
            Ok(gauge)
        };
        let total_requests = int_gauge("storm_requests_total", "Completed requests recorded since start")?;
        let requests_per_minute = int_gauge(
            "storm_requests_per_minute",
            "Completed requests in the rolling window younger than 60 seconds",
        )?;
        let total_bytes = int_gauge("storm_response_bytes_total", "Response body bytes received")?;
        let unique_clients = int_gauge("storm_unique_clients", "Distinct bot ids that completed a request")?;
        let unique_user_agents = int_gauge("storm_unique_user_agents", "Distinct user agents seen")?;
        let errors = int_gauge("storm_errors_total", "Units that ended in an error")?;
        let resets = int_gauge("storm_resets_total", "Units and streams deliberately reset")?;
        let in_flight = int_gauge("storm_in_flight_requests", "Units currently in flight")?;

        let avg_response_time = Gauge::new(
            "storm_avg_response_time_ms",
            "Mean latency over the rolling window in milliseconds",
        )?;
        registry.register(Box::new(avg_response_time.clone()))?;
        let uptime = Gauge::new("storm_uptime_seconds", "Seconds since the aggregator was created")?;
        registry.register(Box::new(uptime.clone()))?;

        Ok(Self {
            registry,
            total_requests,
            requests_per_minute,
            total_bytes,
            unique_clients,
            unique_user_agents,
            errors,
            resets,
            in_flight,
            avg_response_time,
            uptime,
        })
    }

    fn update(&self, snap: &MetricsSnapshot) {
        self.total_requests.set(saturate(snap.total_requests));
        self.requests_per_minute.set(saturate(snap.requests_per_minute as u64));
        self.total_bytes.set(saturate(snap.total_bytes));
        self.unique_clients.set(saturate(snap.unique_clients as u64));
        self.unique_user_agents.set(saturate(snap.unique_user_agents as u64));
        self.errors.set(saturate(snap.error_count));
        self.resets.set(saturate(snap.reset_count));
        self.in_flight.set(saturate(snap.concurrent_requests as u64));
        self.avg_response_time.set(snap.avg_response_time_ms);
        self.uptime.set(snap.uptime_secs);
    }

    pub fn render(&self, aggregator: &MetricsAggregator) -> String {
        self.update(&aggregator.snapshot());

        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();

        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            return format!("# Error encoding metrics: {}", e);
        }

        String::from_utf8(buffer).unwrap_or_else(|_| "# Error: Invalid UTF8".to_string())
    }
}

fn saturate(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
