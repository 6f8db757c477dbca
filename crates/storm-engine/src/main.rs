use clap::{Parser, Subcommand};
use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use std::convert::Infallible;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storm_common::Config;
use storm_engine::engine::profile::ATTACK_PRESETS;
use storm_engine::events::EventLog;
use storm_engine::metrics::MetricsExporter;
use storm_engine::{Controller, MetricsAggregator};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How long bots get to reach their next checkpoint after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser, Debug)]
#[command(name = "storm")]
#[command(about = "Synthetic HTTP/2 benign and rapid reset traffic generator", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "STORM_CONFIG", default_value = "config/storm.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one named scenario end to end
    Scenario { name: String },
    /// Rotate through random scenarios until interrupted
    Continuous {
        /// Stop after this many seconds
        #[arg(long)]
        limit_secs: Option<u64>,
    },
    /// Print the configured scenarios and the attack presets
    List,
}

fn init_production_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_target(true))
        .init();

    info!("Production structured logging initialized (JSON)");
}

fn text(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn metrics_handler(
    req: Request<Body>,
    exporter: Arc<MetricsExporter>,
    aggregator: Arc<MetricsAggregator>,
) -> Result<Response<Body>, Infallible> {
    match req.uri().path() {
        "/health" => Ok(Response::new(Body::from("OK"))),
        "/metrics" => Ok(Response::new(Body::from(exporter.render(&aggregator)))),
        "/snapshot" => match serde_json::to_string(&aggregator.snapshot()) {
            Ok(json) => {
                let mut response = Response::new(Body::from(json));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                Ok(response)
            }
            Err(e) => Ok(text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
        },
        _ => Ok(text(StatusCode::NOT_FOUND, "Not Found")),
    }
}

async fn run_metrics_server(port: u16, aggregator: Arc<MetricsAggregator>) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let exporter = match MetricsExporter::new() {
        Ok(e) => Arc::new(e),
        Err(e) => {
            error!(error = %e, "Failed to register metrics");
            return;
        }
    };

    let make_svc = make_service_fn(move |_conn| {
        let exporter = Arc::clone(&exporter);
        let aggregator = Arc::clone(&aggregator);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                metrics_handler(req, Arc::clone(&exporter), Arc::clone(&aggregator))
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);

    info!(port = port, "Observability server online");

    if let Err(e) = server.await {
        error!(error = %e, "Observability server failed");
    }
}

fn list(config: &Config) {
    println!("scenarios:");
    for (name, sc) in &config.scenarios {
        println!(
            "  {:<24} normal={}s baseline={}s attack={}s",
            name, sc.normal_traffic_duration, sc.baseline_duration, sc.attack_duration
        );
    }
    println!("attack presets:");
    for (key, p) in ATTACK_PRESETS.iter() {
        println!(
            "  {:<24} concurrency={} rate={}/s duration={}s reset_probability={}",
            key,
            p.concurrency(),
            p.target_rate(),
            p.duration().as_secs_f64(),
            p.reset_probability()
        );
    }
    for key in config.profiles.keys() {
        println!("  {:<24} (custom)", key);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_production_logging();

    let config_data = fs::read_to_string(&args.config)?;
    let config = Config::from_yaml(&config_data)?;

    if let Command::List = args.command {
        list(&config);
        return Ok(());
    }

    let events = EventLog::from_config(&config.events)?;
    let controller = Arc::new(Controller::from_config(&config, events)?);
    info!(
        config = %args.config.display(),
        bots = controller.bots().len(),
        scenarios = controller.registry().len(),
        "ResetStorm ready"
    );

    if config.metrics.enabled {
        let port = config.metrics.port;
        let aggregator = Arc::clone(controller.aggregator());
        tokio::spawn(async move {
            run_metrics_server(port, aggregator).await;
        });
    }

    let runner = Arc::clone(&controller);
    let work = async move {
        match args.command {
            Command::Scenario { name } => {
                let report = runner.run_scenario(&name).await?;
                info!(
                    scenario = %report.scenario,
                    phases = report.phases.len(),
                    elapsed_secs = report.elapsed.as_secs_f64(),
                    stopped = report.stopped,
                    "Scenario report"
                );
            }
            Command::Continuous { limit_secs } => {
                let completed = runner
                    .run_continuous(limit_secs.map(Duration::from_secs))
                    .await?;
                info!(completed, "Continuous run ended");
            }
            Command::List => {}
        }
        Ok::<_, storm_engine::ConfigurationError>(())
    };
    tokio::pin!(work);

    tokio::select! {
        res = &mut work => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            controller.stop();
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut work).await {
                Ok(res) => res?,
                Err(_) => warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "Bots did not drain before the grace period ended"),
            }
        }
    }

    controller.events().flush();
    Ok(())
}
