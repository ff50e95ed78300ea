//! Periodic poller loops (spec.md §4.9).
//!
//! Every loop shares the same scheduling discipline: measure the work just
//! done, sleep `max(0, interval - elapsed)`, and if the work itself took
//! longer than the interval, log it but never shorten the next sleep to
//! catch up.

pub mod deferred_greeting;
pub mod link_utilization;
pub mod topology_refresh;

use std::time::{Duration, Instant};

/// Run `tick` in a loop, forever, honoring the scheduling discipline above.
/// The loop exits when `tick` returns `false` (used by shutdown to stop
/// every poller from one signal handler).
pub async fn run_loop<F, Fut>(name: &'static str, interval: Duration, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    loop {
        let started = Instant::now();
        let keep_going = tick().await;
        let elapsed = started.elapsed();

        if !keep_going {
            log::info!("{} poller stopping", name);
            return;
        }

        if elapsed >= interval {
            log::warn!("{} poller took {:?}, longer than its {:?} interval", name, elapsed, interval);
        } else {
            tokio::time::sleep(interval - elapsed).await;
        }
    }
}
