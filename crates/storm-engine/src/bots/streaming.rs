//! Long-lived streaming sessions: one GET whose body is consumed chunk by
//! chunk until the server ends it, the session times out, or the bot stops.

use super::{deadline_after, pause, Bot, StreamingProfile};
use crate::engine::simulator::get_request;
use crate::engine::target::Target;
use crate::events::Event;
use hyper::body::HttpBody;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const RECONNECT_PAUSE: Duration = Duration::from_secs(1);
const PROGRESS_EVERY: u64 = 10;
const STREAM_USER_AGENT: &str = "Mozilla/5.0 (streaming client) StormBot/1.0";

pub(crate) async fn run_sessions(bot: Arc<Bot>, profile: StreamingProfile, stop: CancellationToken, mut rng: StdRng) {
    while !stop.is_cancelled() {
        let Some(target) = bot.targets().choose(&mut rng).cloned() else {
            return;
        };
        stream_once(&bot, &profile, &target, &stop).await;
        if !pause(&stop, RECONNECT_PAUSE).await {
            break;
        }
    }
}

async fn stream_once(bot: &Bot, profile: &StreamingProfile, target: &Target, stop: &CancellationToken) {
    let ctx = bot.context();
    let request_id = bot.next_request_id();
    let url = target.url_for(&profile.path);
    let request = match get_request(&url, STREAM_USER_AGENT, "*/*") {
        Ok(r) => r,
        Err(e) => {
            bot.record_error(Some(request_id), Some(profile.path.clone()), "request", e.to_string());
            return;
        }
    };

    bot.record_sent();
    let _in_flight = ctx.aggregator.track_in_flight();
    let started = Instant::now();
    let deadline = deadline_after(started, profile.timeout);

    let response = match timeout_at(deadline, ctx.client.request(request)).await {
        Ok(Ok(r)) => r,
        Ok(Err(e)) => {
            bot.record_error(Some(request_id), Some(profile.path.clone()), "transport", e.to_string());
            return;
        }
        Err(_) => {
            bot.record_error(
                Some(request_id),
                Some(profile.path.clone()),
                "timeout",
                format!("no response headers within {:?}", profile.timeout),
            );
            return;
        }
    };

    let mut body = response.into_body();
    let mut chunks = 0u64;
    let mut bytes = 0u64;
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => break,
            next = timeout_at(deadline, body.data()) => next,
        };
        match next {
            Ok(Some(Ok(chunk))) => {
                chunks += 1;
                bytes += chunk.len() as u64;
                if chunks % PROGRESS_EVERY == 0 {
                    ctx.events.emit(Event::StreamingProgress {
                        bot_id: bot.id().to_string(),
                        url: url.clone(),
                        chunks_received: chunks,
                        session_duration: started.elapsed().as_secs_f64(),
                        chunk_size: chunk.len(),
                    });
                }
            }
            Ok(Some(Err(e))) => {
                debug!(bot = %bot.id(), url = %url, error = %e, "Stream interrupted");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                debug!(bot = %bot.id(), url = %url, chunks, "Streaming session timed out");
                break;
            }
        }
    }

    bot.record_response(STREAM_USER_AGENT, bytes, started.elapsed());
    debug!(bot = %bot.id(), url = %url, chunks, bytes, "Streaming session ended");
}
