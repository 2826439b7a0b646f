//! Background sweep tasks for the process-wide stores.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

/// Handle to a periodic background task. Stop it with
/// [`MaintenanceHandle::shutdown`]; dropping the handle aborts the task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    name: &'static str,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Runs `sweep` every `period` until shut down. The first sweep happens
    /// one period after spawning.
    pub fn spawn<F>(name: &'static str, period: Duration, mut sweep: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (stop, mut stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        debug!(task = name, "Running maintenance sweep");
                        sweep();
                    }
                }
            }
        });
        Self {
            name,
            stop: Some(stop),
            task: Some(task),
        }
    }

    /// Signals the task to stop and waits for it to finish.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!(task = self.name, "Maintenance task stopped");
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
