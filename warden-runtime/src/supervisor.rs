//! Supervised periodic tasks
//!
//! Each registered task runs on its own interval until shutdown. Every
//! iteration is spawned separately, so an error or a panic is logged and the
//! loop carries on at the next tick.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::Result;

type TaskHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct TaskSpec {
    name: &'static str,
    interval: Duration,
    handler: TaskHandler,
}

/// Run counters for one task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub runs: u64,
    pub failures: u64,
    pub panics: u64,
    pub last_error: Option<String>,
}

type StatusMap = Arc<RwLock<BTreeMap<&'static str, TaskStatus>>>;

/// Named set of periodic tasks started and stopped together
pub struct TaskSupervisor {
    names: Vec<&'static str>,
    tasks: Vec<TaskSpec>,
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<bool>,
    status: StatusMap,
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            names: Vec::new(),
            tasks: Vec::new(),
            handles: Vec::new(),
            shutdown_tx,
            status: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Register a task. Tasks do not run until `start`.
    pub fn register<F, Fut>(&mut self, name: &'static str, every: Duration, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.names.push(name);
        self.tasks.push(TaskSpec {
            name,
            interval: every.max(Duration::from_millis(1)),
            handler: Arc::new(move || handler().boxed()),
        });
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.names.clone()
    }

    /// Spawn every registered task. The first run happens one interval after start.
    pub fn start(&mut self) {
        for spec in self.tasks.drain(..) {
            info!(task = spec.name, interval = ?spec.interval, "Starting background task");
            let shutdown = self.shutdown_tx.subscribe();
            let status = Arc::clone(&self.status);
            self.handles.push(tokio::spawn(supervise(spec, shutdown, status)));
        }
    }

    /// Counters for every task that has run at least once
    pub async fn status(&self) -> BTreeMap<&'static str, TaskStatus> {
        self.status.read().await.clone()
    }

    /// Signal every task to stop and wait for them
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("Background task did not stop cleanly: {}", e);
            }
        }
        info!("Background tasks stopped");
    }
}

async fn supervise(spec: TaskSpec, mut shutdown: watch::Receiver<bool>, status: StatusMap) {
    let mut ticker = interval(spec.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(task = spec.name, "Task shutting down");
                    break;
                }
                continue;
            }
        }

        let outcome = tokio::spawn((spec.handler)()).await;

        let mut statuses = status.write().await;
        let entry = statuses.entry(spec.name).or_default();
        entry.runs += 1;
        match outcome {
            Ok(Ok(())) => debug!(task = spec.name, "Task iteration complete"),
            Ok(Err(e)) => {
                warn!(task = spec.name, error = %e, "Task iteration failed");
                entry.failures += 1;
                entry.last_error = Some(e.to_string());
            }
            Err(join) if join.is_panic() => {
                error!(task = spec.name, "Task iteration panicked");
                entry.panics += 1;
                entry.last_error = Some("panicked".to_string());
            }
            Err(join) => {
                warn!(task = spec.name, "Task iteration cancelled: {}", join);
                entry.failures += 1;
                entry.last_error = Some(join.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn test_failures_do_not_stop_the_loop() {
        let calls = Arc::new(AtomicU64::new(0));
        let mut supervisor = TaskSupervisor::new();

        let counter = Arc::clone(&calls);
        supervisor.register("flaky", Duration::from_millis(10), move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                match n {
                    0 => panic!("first run explodes"),
                    1 => Err(EngineError::TaskFailed("second run fails".into())),
                    _ => Ok(()),
                }
            }
        });
        assert_eq!(supervisor.task_names(), vec!["flaky"]);

        supervisor.start();
        assert_eq!(supervisor.task_names(), vec!["flaky"]);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let status = supervisor.status().await;
        let flaky = &status["flaky"];
        assert!(flaky.runs >= 3, "runs = {}", flaky.runs);
        assert_eq!(flaky.panics, 1);
        assert_eq!(flaky.failures, 1);
        supervisor.shutdown().await;
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_tasks() {
        let calls = Arc::new(AtomicU64::new(0));
        let mut supervisor = TaskSupervisor::new();
        for name in ["a", "b"] {
            let counter = Arc::clone(&calls);
            supervisor.register(name, Duration::from_millis(5), move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            });
        }

        supervisor.start();
        tokio::time::sleep(Duration::from_millis(40)).await;
        supervisor.shutdown().await;

        let after_shutdown = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(calls.load(Ordering::SeqCst), after_shutdown);
    }
}
