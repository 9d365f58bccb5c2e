use std::{sync::Arc, time::Duration};

use chrono::{TimeDelta, Utc};
use tokio::{sync::oneshot, task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use crate::{
    error::{AppError, AppResult},
    repository::UserRepository,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    pub retention: Duration,
    pub interval: Duration,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(30),
            interval: Duration::from_secs(1),
        }
    }
}

/// One sweep: removes users not seen within `retention`.
pub async fn sweep_once(repo: &dyn UserRepository, retention: Duration) -> AppResult<u64> {
    let window = TimeDelta::from_std(retention)
        .map_err(|err| AppError::validation(format!("retention window out of range: {err}")))?;
    let cutoff = Utc::now() - window;

    let removed = repo.delete_seen_before(cutoff).await?;
    if removed > 0 {
        info!(removed, cutoff = %cutoff, "obsolete users removed");
    } else {
        debug!(cutoff = %cutoff, "no obsolete users");
    }
    Ok(removed)
}

/// Background worker running [`sweep_once`] on a fixed cadence.
pub struct SweeperWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl SweeperWorker {
    /// Signals the worker to stop and waits for it to finish.
    pub async fn stop(mut self) -> AppResult<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle.await?;
        }
        Ok(())
    }
}

impl Drop for SweeperWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

/// Spawns the sweeper. A failed tick is logged and retried on the next one.
pub fn spawn_sweeper(repo: Arc<dyn UserRepository>, settings: SweepSettings) -> SweeperWorker {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let interval = settings.interval.max(Duration::from_millis(10));

    let join_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    break;
                }
                _ = sleep(interval) => {
                    if let Err(err) = sweep_once(repo.as_ref(), settings.retention).await {
                        warn!(error = %err, "obsolete user sweep failed");
                    }
                }
            }
        }
        debug!("sweeper stopped");
    });

    SweeperWorker {
        stop_tx: Some(stop_tx),
        join_handle: Some(join_handle),
    }
}
