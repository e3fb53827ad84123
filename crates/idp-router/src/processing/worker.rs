//! Background workers driving pipeline stages

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// One queue-driven stage of the pipeline
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Short stage name for logs
    fn name(&self) -> &str;

    /// Drain what is currently visible; returns the number of messages handled
    async fn run_cycle(&self, cancel: &CancellationToken) -> Result<usize>;
}

/// Runs a stage in a loop until cancelled
pub struct StageWorker {
    stage: Arc<dyn PipelineStage>,
    idle_backoff: Duration,
}

impl StageWorker {
    pub fn new(stage: Arc<dyn PipelineStage>, idle_backoff: Duration) -> Self {
        Self {
            stage,
            idle_backoff,
        }
    }

    /// Spawn the loop on the runtime
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    pub async fn run(self, cancel: CancellationToken) {
        let name = self.stage.name().to_string();
        tracing::info!("[{}] Stage worker started (idle backoff {:?})", name, self.idle_backoff);

        let mut cycles: u64 = 0;
        while !cancel.is_cancelled() {
            let pause = match self.stage.run_cycle(&cancel).await {
                Ok(0) => Some(self.idle_backoff),
                Ok(handled) => {
                    cycles += 1;
                    tracing::debug!("[{}] Cycle {} handled {} messages", name, cycles, handled);
                    None
                }
                Err(e) => {
                    // Unacked messages come back after their visibility timeout
                    tracing::error!("[{}] Cycle failed: {}", name, e);
                    Some(self.idle_backoff)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::info!("[{}] Stage worker stopped after {} busy cycles", name, cycles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl PipelineStage for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run_cycle(&self, _cancel: &CancellationToken) -> Result<usize> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_first && call == 0 {
                return Err(Error::queue("boom"));
            }
            Ok(if call < 3 { 1 } else { 0 })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_loops_until_cancelled() {
        let stage = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            fail_first: false,
        });
        let cancel = CancellationToken::new();
        let handle = StageWorker::new(stage.clone(), Duration::from_secs(5)).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        handle.await.unwrap();

        // 3 busy cycles back to back, then idle cycles every 5s
        let calls = stage.calls.load(Ordering::SeqCst);
        assert!((5..=6).contains(&calls), "calls = {}", calls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_survives_failed_cycle() {
        let stage = Arc::new(Scripted {
            calls: AtomicUsize::new(0),
            fail_first: true,
        });
        let cancel = CancellationToken::new();
        let handle = StageWorker::new(stage.clone(), Duration::from_secs(1)).spawn(cancel.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(stage.calls.load(Ordering::SeqCst) >= 2);
    }
}
