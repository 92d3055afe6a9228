//! Subscriber Registry: a name -> runner table with panic-restart
//! supervision and orderly shutdown.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use talos_infra_pubsub::PubSub;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const MAX_RESTARTS: u32 = 5;

type Runner = Arc<dyn Fn(PubSub, Arc<Notify>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps a future-returning closure as a [`Runner`]. Call sites use
/// `registry.register("monitor", runner(move |bus, shutdown| { ... }))`.
pub fn runner<F, Fut>(f: F) -> Runner
where
    F: Fn(PubSub, Arc<Notify>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |bus, shutdown| Box::pin(f(bus, shutdown)))
}

pub struct SubscriberRegistry {
    runners: HashMap<String, Runner>,
    bus: PubSub,
    shutdown: Arc<Notify>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl SubscriberRegistry {
    pub fn new(bus: PubSub) -> Self {
        Self { runners: HashMap::new(), bus, shutdown: Arc::new(Notify::new()), handles: Vec::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, runner: Runner) {
        self.runners.insert(name.into(), runner);
    }

    /// Spawns every name in `enabled` whose value is `true`, each wrapped in
    /// a supervisor that restarts the runner on panic up to
    /// [`MAX_RESTARTS`]. Names absent from `enabled` default to disabled.
    pub fn start_enabled(&mut self, enabled: &HashMap<String, bool>) {
        for (name, runner) in &self.runners {
            if !enabled.get(name).copied().unwrap_or(false) {
                info!(name, "subscriber disabled, not starting");
                continue;
            }
            let name = name.clone();
            let runner = runner.clone();
            let bus = self.bus.clone();
            let shutdown = self.shutdown.clone();
            let handle = tokio::spawn(supervise(name.clone(), runner, bus, shutdown));
            self.handles.push((name, handle));
        }
    }

    /// Signals every runner to stop and waits for graceful exit.
    pub async fn stop_all(self) {
        self.shutdown.notify_waiters();
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                error!(name, error = %e, "subscriber task did not exit cleanly");
            }
        }
    }
}

async fn supervise(name: String, runner: Runner, bus: PubSub, shutdown: Arc<Notify>) {
    let mut restarts = 0;
    loop {
        let task_bus = bus.clone();
        let task_shutdown = shutdown.clone();
        let task_runner = runner.clone();
        let result = tokio::spawn(async move { task_runner(task_bus, task_shutdown).await }).await;

        match result {
            Ok(()) => {
                info!(name, "subscriber exited");
                return;
            }
            Err(e) if e.is_panic() => {
                restarts += 1;
                if restarts > MAX_RESTARTS {
                    error!(name, restarts, "subscriber panicked too many times, giving up");
                    return;
                }
                warn!(name, restarts, "subscriber panicked, restarting");
            }
            Err(e) => {
                error!(name, error = %e, "subscriber task cancelled");
                return;
            }
        }
    }
}
