//! Request-level reset flood: repeated bursts of the bot's intensity profile
//! through the batch dispatcher until the run deadline.

use super::{pause, Bot};
use crate::engine::dispatcher::run_rate_limited;
use crate::engine::profile::IntensityProfile;
use crate::engine::simulator::{Outcome, RequestSimulator, UnitPlan};
use crate::error::UnitError;
use crate::events::{AttackShape, Event};
use rand::rngs::StdRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Pause between bursts.
const BURST_GAP: Duration = Duration::from_secs(1);

pub(crate) async fn run_bursts(
    bot: Arc<Bot>,
    profile: Arc<IntensityProfile>,
    deadline: Instant,
    stop: CancellationToken,
    mut rng: StdRng,
) {
    while !stop.is_cancelled() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let burst = Arc::new(profile.with_duration(profile.duration().min(remaining)));
        run_burst(&bot, burst, &stop, &mut rng).await;

        if !pause(&stop, BURST_GAP).await {
            break;
        }
    }
}

async fn run_burst(bot: &Arc<Bot>, profile: Arc<IntensityProfile>, stop: &CancellationToken, rng: &mut StdRng) {
    let ctx = bot.context();
    let simulator = RequestSimulator::new(ctx.client.clone(), bot.shared_targets(), Arc::clone(&profile));

    ctx.events.emit(Event::AttackStart {
        bot_id: bot.id().to_string(),
        attack_name: profile.name().to_string(),
        config: AttackShape::from(profile.as_ref()),
    });
    info!(
        bot = %bot.id(),
        profile = %profile.name(),
        rate = profile.target_rate(),
        concurrency = profile.concurrency(),
        secs = profile.duration().as_secs_f64(),
        "Reset flood burst starting"
    );

    let report = run_rate_limited(&profile, stop, |_| {
        let plan = simulator.plan(&mut *rng);
        let simulator = simulator.clone();
        let bot = Arc::clone(bot);
        async move { run_unit(&bot, &simulator, plan).await }
    })
    .await;

    ctx.events.emit(Event::AttackEnd {
        bot_id: bot.id().to_string(),
        attack_name: profile.name().to_string(),
        total_requests: report.issued,
        completed: report.completed,
        resets: report.resets,
        errors: report.errors,
        duration_seconds: report.elapsed.as_secs_f64(),
        server_metrics: ctx.aggregator.snapshot(),
    });
    info!(
        bot = %bot.id(),
        profile = %profile.name(),
        issued = report.issued,
        completed = report.completed,
        resets = report.resets,
        errors = report.errors,
        achieved_rate = report.achieved_rate(),
        "Reset flood burst finished"
    );
}

/// One unit: bookkeeping around [`RequestSimulator::execute`].
async fn run_unit(bot: &Bot, simulator: &RequestSimulator, plan: UnitPlan) -> Outcome {
    let ctx = bot.context();
    let request_id = bot.next_request_id();
    let url = plan.url();

    if ctx.events.logs_requests() {
        ctx.events.emit(Event::RequestStart {
            request_id: request_id.clone(),
            bot_id: bot.id().to_string(),
            url: url.clone(),
            endpoint: plan.path.clone(),
            user_agent: plan.user_agent.clone(),
            mode: plan.mode.as_str().to_string(),
        });
    }

    bot.record_sent();
    let in_flight = ctx.aggregator.track_in_flight();
    let outcome = simulator.execute(&plan).await;
    drop(in_flight);

    let (status_code, response_time, response_size) = match &outcome {
        Outcome::Completed {
            status,
            bytes,
            latency,
        } => {
            bot.record_response(&plan.user_agent, *bytes, *latency);
            (Some(*status), *latency, *bytes)
        }
        Outcome::Reset { elapsed } => {
            bot.record_reset();
            (None, *elapsed, 0)
        }
        Outcome::Errored(e) => {
            let error_type = match e {
                UnitError::TimeoutUnexpected(_) => "timeout",
                UnitError::Transport(_) => "transport",
            };
            bot.record_error(
                Some(request_id.clone()),
                Some(plan.path.clone()),
                error_type,
                e.to_string(),
            );
            (None, simulator.timeout_for(plan.mode), 0)
        }
    };

    if ctx.events.logs_requests() {
        ctx.events.emit(Event::RequestEnd {
            request_id,
            bot_id: bot.id().to_string(),
            endpoint: plan.path,
            outcome: outcome.label().to_string(),
            status_code,
            response_time_ms: response_time.as_secs_f64() * 1000.0,
            response_size,
            server_metrics: ctx
                .events
                .wants_request_snapshots()
                .then(|| ctx.aggregator.snapshot()),
        });
    }
    outcome
}
