//! Benign browsing sessions: random page views separated by human-like think
//! time, with longer gaps between sessions.

use super::{pause, uniform_duration, Bot, BrowsingProfile};
use crate::engine::simulator::{get_request, HttpClient};
use crate::engine::target::Target;
use crate::error::UnitError;
use crate::events::Event;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Back-off after a failed page view.
const ERROR_PAUSE: Duration = Duration::from_secs(1);

pub(crate) async fn run_sessions(bot: Arc<Bot>, profile: BrowsingProfile, stop: CancellationToken, mut rng: StdRng) {
    while !stop.is_cancelled() {
        let Some(target) = bot.targets().choose(&mut rng).cloned() else {
            return;
        };
        browse(&bot, &profile, &target, &stop, &mut rng).await;

        let gap = uniform_duration(&mut rng, profile.session_gap);
        if !pause(&stop, gap).await {
            break;
        }
    }
}

async fn browse(bot: &Bot, profile: &BrowsingProfile, target: &Target, stop: &CancellationToken, rng: &mut StdRng) {
    let session_length = uniform_duration(rng, profile.session_length);
    let session_start = Instant::now();
    let user_agent = profile
        .user_agents
        .choose(rng)
        .cloned()
        .unwrap_or_default();
    let min_interval = profile.min_interval();

    debug!(bot = %bot.id(), target = %target.name(), secs = session_length.as_secs_f64(), "Session start");

    while session_start.elapsed() < session_length && !stop.is_cancelled() {
        let Some(path) = profile.paths.choose(rng).cloned() else {
            return;
        };
        let request_id = bot.next_request_id();
        let url = target.url_for(&path);
        let ctx = bot.context();

        bot.record_sent();
        let in_flight = ctx.aggregator.track_in_flight();
        let started = Instant::now();
        let result = timeout(
            profile.request_timeout,
            fetch(&ctx.client, &url, &user_agent),
        )
        .await;
        let latency = started.elapsed();
        drop(in_flight);

        let failed = match result {
            Ok(Ok((status, size))) => {
                bot.record_response(&user_agent, size, latency);
                ctx.events.emit(Event::NormalRequest {
                    request_id,
                    bot_id: bot.id().to_string(),
                    url,
                    endpoint: path,
                    status_code: status,
                    response_time_ms: latency.as_secs_f64() * 1000.0,
                    response_size: size,
                    user_agent: user_agent.clone(),
                    session_time_secs: session_start.elapsed().as_secs_f64(),
                });
                false
            }
            Ok(Err(e)) => {
                debug!(bot = %bot.id(), url = %url, error = %e, "Page view failed");
                bot.record_error(Some(request_id), Some(path), "transport", e.to_string());
                true
            }
            Err(_) => {
                bot.record_error(
                    Some(request_id),
                    Some(path),
                    "timeout",
                    format!("no response within {:?}", profile.request_timeout),
                );
                true
            }
        };

        let wait = if failed {
            ERROR_PAUSE
        } else {
            uniform_duration(rng, profile.think_time).max(min_interval)
        };
        if !pause(stop, wait).await {
            break;
        }
    }
}

async fn fetch(client: &HttpClient, url: &str, user_agent: &str) -> Result<(u16, u64), UnitError> {
    let request = get_request(url, user_agent, "application/json,text/html,application/xhtml+xml")?;
    let transport = |e: hyper::Error| UnitError::Transport(e.to_string());
    let response = client.request(request).await.map_err(transport)?;
    let status = response.status().as_u16();
    let body = hyper::body::to_bytes(response.into_body())
        .await
        .map_err(transport)?;
    Ok((status, body.len() as u64))
}
