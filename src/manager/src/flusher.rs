use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::manager::Manager;

/// Flusher is the background task writing dirty domains back every
/// save threshold.
pub struct Flusher {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Flusher {
    pub(crate) fn start(manager: Manager) -> Self {
        let (shutdown, mut rx) = watch::channel(false);
        let period = manager.options().save_threshold();

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let report = manager.flush_all().await;
                        if report.flushed > 0 || report.failed > 0 {
                            tracing::debug!(
                                "flush sweep done, flushed: {}, failed: {}",
                                report.flushed,
                                report.failed
                            );
                        }
                    }
                    _ = rx.changed() => break,
                }
            }
            tracing::info!("flusher stopped");
        });

        tracing::info!("flusher started, save threshold: {:?}", period);
        Self { shutdown, handle }
    }

    /// shutdown stops the flusher, waiting for a sweep in progress.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!("flusher task failed: {}", e);
        }
    }
}
