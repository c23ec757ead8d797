//! The processing loop.
//!
//! Runs forever: fetch a batch, process it, sleep, repeat. A failed cycle
//! moves the loop into a backoff state whose duration depends on the error
//! class: configuration problems wait much longer than transient
//! connectivity blips, so a broken setup does not turn into a tight retry
//! loop against the mail server. Shutdown is cooperative: the flag is
//! checked between cycles and between messages, and whatever message is in
//! flight completes first.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::LoopConfig;
use crate::error::IngestError;
use crate::ingest::Processor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Backoff(Duration),
}

pub struct Worker {
    processor: Processor,
    cadence: LoopConfig,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(processor: Processor, cadence: LoopConfig) -> Self {
        Self {
            processor,
            cadence,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the loop after the in-flight message completes.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Run until the shutdown flag is raised.
    pub async fn run(&self) {
        log::info!("processing loop started");

        let mut state = LoopState::Idle;

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                log::info!("processing loop stopped");
                return;
            }

            if let LoopState::Backoff(duration) = state {
                log::warn!("backing off for {}s", duration.as_secs());
                self.sleep_interruptible(duration).await;
                state = LoopState::Idle;
                continue;
            }

            match self.processor.run_cycle(&self.shutdown).await {
                Ok(stats) => {
                    if stats.fetched > 0 {
                        log::info!(
                            "cycle complete: {} fetched, {} created, {} attached, {} duplicates, {} failures",
                            stats.fetched,
                            stats.created,
                            stats.attached,
                            stats.duplicates,
                            stats.failures
                        );
                    }
                    self.sleep_interruptible(self.cadence.poll_interval).await;
                }
                Err(err) => {
                    log::error!("processing cycle failed: {}", err);
                    state = LoopState::Backoff(backoff_for(&self.cadence, &err));
                }
            }
        }
    }

    /// Sleep in one-second slices so a shutdown request does not have to
    /// wait out a long backoff.
    async fn sleep_interruptible(&self, duration: Duration) {
        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            let slice = remaining.min(Duration::from_secs(1));
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
    }
}

fn backoff_for(cadence: &LoopConfig, err: &IngestError) -> Duration {
    match err {
        IngestError::Configuration(_) => cadence.config_backoff,
        _ => cadence.error_backoff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cadence() -> LoopConfig {
        LoopConfig {
            poll_interval: Duration::from_secs(10),
            error_backoff: Duration::from_secs(60),
            config_backoff: Duration::from_secs(300),
        }
    }

    #[test]
    fn configuration_errors_back_off_longest() {
        let cadence = cadence();

        assert_eq!(
            backoff_for(&cadence, &IngestError::Configuration("missing".into())),
            Duration::from_secs(300)
        );
        assert_eq!(
            backoff_for(&cadence, &IngestError::Connectivity("refused".into())),
            Duration::from_secs(60)
        );
        assert_eq!(
            backoff_for(&cadence, &IngestError::Conflict("duplicate".into())),
            Duration::from_secs(60)
        );
    }
}
