mod support;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storm_engine::engine::dispatcher::run_rate_limited;
use storm_engine::engine::simulator::Outcome;
use storm_engine::UnitError;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

fn completed() -> Outcome {
    Outcome::Completed {
        status: 200,
        bytes: 0,
        latency: Duration::ZERO,
    }
}

#[tokio::test(start_paused = true)]
async fn test_paced_run_issues_budget_over_duration() {
    let profile = support::profile(20, 50, Duration::from_secs(30), 0.8);
    let stop = CancellationToken::new();
    let issued_at = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    let log = Arc::clone(&issued_at);
    let report = run_rate_limited(&profile, &stop, move |_| {
        log.lock().push(Instant::now());
        async { completed() }
    })
    .await;

    assert_eq!(report.issued, 1500);
    assert_eq!(report.completed, 1500);
    assert_eq!(report.batches, 75);
    assert!(report.elapsed >= Duration::from_secs(30));
    assert!(report.achieved_rate() <= 50.0);

    // Each batch is held to its pacing window, so by any instant t at most
    // R*t units plus one batch have been issued.
    let times = issued_at.lock();
    for k in 1..=30u64 {
        let cutoff = start + Duration::from_secs(k);
        let before = times.iter().filter(|t| **t < cutoff).count() as u64;
        assert!(before <= 50 * k + 20, "{} units before {}s", before, k);
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_clamped_when_rate_below_concurrency() {
    let profile = support::profile(100, 10, Duration::from_secs(2), 0.0);
    let stop = CancellationToken::new();
    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let (l, p) = (Arc::clone(&live), Arc::clone(&peak));
    let report = run_rate_limited(&profile, &stop, move |_| {
        let live = Arc::clone(&l);
        let peak = Arc::clone(&p);
        async move {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_millis(10)).await;
            live.fetch_sub(1, Ordering::SeqCst);
            completed()
        }
    })
    .await;

    assert_eq!(peak.load(Ordering::SeqCst), 10);
    assert_eq!(report.issued, 20);
    assert_eq!(report.batches, 2);
}

#[tokio::test(start_paused = true)]
async fn test_batch_in_flight_finishes_past_duration() {
    let profile = support::profile(5, 5, Duration::from_secs(2), 0.0);
    let stop = CancellationToken::new();

    let report = run_rate_limited(&profile, &stop, |_| async {
        sleep(Duration::from_secs(3)).await;
        completed()
    })
    .await;

    // The first batch outlives the duration; it is not cut short and no
    // second batch starts.
    assert_eq!(report.batches, 1);
    assert_eq!(report.issued, 5);
    assert_eq!(report.completed, 5);
    assert!(report.elapsed >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_unit_failures_are_isolated() {
    let profile = support::profile(10, 10, Duration::from_secs(3), 0.5);
    let stop = CancellationToken::new();

    let report = run_rate_limited(&profile, &stop, |seq| async move {
        match seq % 4 {
            0 => Outcome::Errored(UnitError::Transport("refused".into())),
            1 => Outcome::Reset {
                elapsed: Duration::from_millis(50),
            },
            2 => panic!("unit {} blew up", seq),
            _ => completed(),
        }
    })
    .await;

    assert_eq!(report.issued, 30);
    assert_eq!(report.batches, 3);
    assert_eq!(report.completed + report.resets + report.errors, report.issued);
    assert_eq!(report.resets, 8);
    assert_eq!(report.completed, 7);
    // Transport errors plus panicked units.
    assert_eq!(report.errors, 15);
}

#[tokio::test(start_paused = true)]
async fn test_stop_ends_dispatch_at_batch_boundary() {
    let profile = support::profile(5, 5, Duration::from_secs(60), 0.0);
    let stop = CancellationToken::new();

    let trigger = stop.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(2500)).await;
        trigger.cancel();
    });

    let report = run_rate_limited(&profile, &stop, |_| async { completed() }).await;

    assert!(report.elapsed < Duration::from_secs(4));
    assert_eq!(report.issued, 15);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_issues_nothing() {
    let profile = support::profile(5, 5, Duration::from_secs(10), 0.0);
    let stop = CancellationToken::new();
    stop.cancel();

    let report = run_rate_limited(&profile, &stop, |_| async { completed() }).await;
    assert_eq!(report.issued, 0);
    assert_eq!(report.batches, 0);
}
