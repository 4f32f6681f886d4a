// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fixed-delay driver loops.
//!
//! Each driver runs `tick` to completion, then waits out the configured
//! delay before the next invocation (`MissedTickBehavior::Delay`, so a
//! slow tick never causes a burst). A watch channel signals shutdown;
//! in-flight work finishes before the loop exits. Persisted state is
//! either committed or absent, never partial, so stopping between ticks
//! is always safe.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Create a shutdown signal pair. Send `true` to stop every driver loop.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Run `tick` forever with a fixed delay between invocations, until the
/// shutdown signal fires.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    delay: Duration,
    mut shutdown: watch::Receiver<bool>,
    tick: F,
) where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(delay);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(target: "bsi.driver", driver = name, delay_ms = delay.as_millis() as u64, "driver started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                debug!(target: "bsi.driver", driver = name, "tick");
                tick().await;
            }
            changed = shutdown.changed() => {
                let stop = changed.is_err() || *shutdown.borrow();
                if stop {
                    info!(target: "bsi.driver", driver = name, "driver stopping");
                    return;
                }
            }
        }
    }
}

/// Spawn [`run_periodic`] on the runtime.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    delay: Duration,
    shutdown: watch::Receiver<bool>,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(run_periodic(name, delay, shutdown, tick))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn ticks_until_shutdown() {
        let (tx, rx) = shutdown_channel();
        let count = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&count);

        let handle = spawn_periodic("test", Duration::from_millis(5), rx, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let ticks = count.load(Ordering::SeqCst);
        assert!(ticks >= 2, "expected several ticks, got {ticks}");
    }

    #[tokio::test]
    async fn dropping_the_sender_stops_the_loop() {
        let (tx, rx) = shutdown_channel();
        let handle = spawn_periodic("test", Duration::from_millis(5), rx, || async {});
        drop(tx);
        // The loop observes the closed channel and exits.
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("driver loop must stop")
            .unwrap();
    }
}
