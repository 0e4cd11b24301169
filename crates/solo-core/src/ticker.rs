//! Background ticker that keeps emitting log events at three levels, so that
//! a change of logging rules or message pattern shows up in the output
//! right away.

use std::time::Duration;

use solo_config::TickerConfig;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::instance::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickLevel {
    Debug,
    Info,
    Warn,
}

/// Running tick loops.
#[derive(Debug)]
pub struct Ticker {
    tasks: Vec<JoinHandle<()>>,
}

impl Ticker {
    /// Start one loop per level with a non-zero interval. Every loop ends on
    /// the next [`ShutdownSignal`].
    pub fn spawn(config: &TickerConfig, shutdown: &broadcast::Sender<ShutdownSignal>) -> Self {
        if !config.enabled {
            debug!("Ticker disabled");
            return Self { tasks: Vec::new() };
        }

        let loops = [
            (TickLevel::Debug, config.debug_interval_ms),
            (TickLevel::Info, config.info_interval_ms),
            (TickLevel::Warn, config.warn_interval_ms),
        ];
        let tasks = loops
            .into_iter()
            .filter(|&(_, ms)| ms > 0)
            .map(|(level, ms)| {
                tokio::spawn(tick_loop(level, Duration::from_millis(ms), shutdown.subscribe()))
            })
            .collect();
        Self { tasks }
    }

    /// Number of loops started.
    pub fn loop_count(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every loop to finish.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Ticker loop ended abnormally");
            }
        }
    }
}

async fn tick_loop(
    level: TickLevel,
    period: Duration,
    mut shutdown: broadcast::Receiver<ShutdownSignal>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut tick: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = interval.tick() => {
                tick += 1;
                match level {
                    TickLevel::Debug => debug!(tick, "Debug message"),
                    TickLevel::Info => info!(tick, "Info message"),
                    TickLevel::Warn => warn!(tick, "Warning message"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use solo_test_utils::tracing_setup::CapturedWriter;
    use tracing_subscriber::util::SubscriberInitExt;

    #[tokio::test]
    async fn test_disabled_ticker_starts_nothing() {
        let (shutdown, _) = broadcast::channel(1);
        let config = TickerConfig {
            enabled: false,
            ..TickerConfig::default()
        };
        let ticker = Ticker::spawn(&config, &shutdown);
        assert_eq!(ticker.loop_count(), 0);
        ticker.join().await;
    }

    #[tokio::test]
    async fn test_zero_interval_disables_a_level() {
        let writer = CapturedWriter::default();
        let _guard = tracing_subscriber::fmt()
            .with_writer(writer.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish()
            .set_default();

        let (shutdown, _) = broadcast::channel(1);
        let config = TickerConfig {
            enabled: true,
            debug_interval_ms: 10,
            info_interval_ms: 0,
            warn_interval_ms: 0,
        };
        let ticker = Ticker::spawn(&config, &shutdown);
        assert_eq!(ticker.loop_count(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown.send(ShutdownSignal).unwrap();
        ticker.join().await;

        let lines = writer.lines();
        assert!(lines.iter().any(|l| l.contains("Debug message")));
        assert!(!lines.iter().any(|l| l.contains("Info message")));
    }
}
