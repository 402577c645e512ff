//! Fixed-interval background tasks.
//!
//! Every sweep and the refresh loop run as a [`TaskHandle`] that can be
//! stopped on its own. Tests skip starting them and call the sweep methods
//! directly.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Period used when a task is spawned with a zero interval.
pub const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Handle to a running periodic task.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl TaskHandle {
    /// Name given at spawn time.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the task to stop and wait for it.
    ///
    /// A run already in progress completes before the loop exits.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.join.await {
            debug!(task = self.name, error = %e, "Task ended abnormally");
        }
        info!(task = self.name, "Background task stopped");
    }
}

/// Spawn `run` every `period`, skipping the immediate first tick.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut run: F) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = if period.is_zero() {
        warn!(task = name, "Zero interval, using {}s", MIN_PERIOD.as_secs());
        MIN_PERIOD
    } else {
        period
    };
    let (shutdown, mut stop_rx) = watch::channel(false);

    let join = tokio::spawn(async move {
        let mut timer = interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => run().await,
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    info!(
        task = name,
        interval_secs = period.as_secs(),
        "Background task started"
    );

    TaskHandle {
        name,
        shutdown,
        join,
    }
}

/// Collection of tasks stopped together at shutdown.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    handles: Vec<TaskHandle>,
}

impl BackgroundTasks {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a running task.
    pub fn push(&mut self, handle: TaskHandle) {
        self.handles.push(handle);
    }

    /// Number of tracked tasks.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no task is tracked.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every tracked task.
    pub async fn stop_all(self) {
        for handle in self.handles {
            handle.stop().await;
        }
    }
}
