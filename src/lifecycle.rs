use std::{sync::Arc, time::Duration};
use tokio::{runtime::Handle, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    flow::FlowError,
    node::{Node, ShutdownSignal},
};

struct RunningNode {
    id: String,
    handle: JoinHandle<()>,
}

/// Starts runner-capable nodes and broadcasts shutdown to them.
///
/// One cancellation token per run; `stop` trips it and a later `start`
/// builds a fresh one.
#[derive(Default)]
pub struct Lifecycle {
    token: Option<CancellationToken>,
    running: Vec<RunningNode>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.token.is_some()
    }

    /// Spawns one task per node that supports running on its own.
    /// Returns how many were started.
    pub fn start(&mut self, nodes: Vec<Arc<dyn Node>>) -> Result<usize, FlowError> {
        if self.token.is_some() {
            return Err(FlowError::AlreadyRunning);
        }
        let handle = Handle::try_current().map_err(|_| FlowError::NoRuntime)?;

        let token = CancellationToken::new();
        for node in nodes {
            let id = node.id();
            let Some(runner) = node.as_runner() else {
                continue;
            };
            let shutdown = ShutdownSignal::new(token.clone());
            let task_id = id.clone();
            let task = handle.spawn(async move {
                runner.run(shutdown).await;
                debug!(node = %task_id, "runner exited");
            });
            self.running.push(RunningNode { id, handle: task });
        }
        info!("started {} runner node(s)", self.running.len());
        self.token = Some(token);
        Ok(self.running.len())
    }

    /// Trips the shutdown signal without waiting for the runners.
    /// The returned [`StoppedRun`] can be joined or simply dropped.
    pub fn stop(&mut self) -> Result<StoppedRun, FlowError> {
        let token = self.token.take().ok_or(FlowError::NotRunning)?;
        token.cancel();
        let running = std::mem::take(&mut self.running);
        info!("stop requested for {} runner node(s)", running.len());
        Ok(StoppedRun { running })
    }
}

/// Runner tasks of a run whose shutdown signal has been tripped.
pub struct StoppedRun {
    running: Vec<RunningNode>,
}

impl StoppedRun {
    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }

    /// Waits up to `limit` for every runner to exit, aborting the rest.
    /// Returns the ids of the runners that had to be aborted.
    pub async fn join(mut self, limit: Duration) -> Vec<String> {
        let wait_all = async {
            for node in self.running.iter_mut() {
                let _ = (&mut node.handle).await;
            }
        };
        if timeout(limit, wait_all).await.is_ok() {
            return Vec::new();
        }
        let mut aborted = Vec::new();
        for node in self.running {
            if !node.handle.is_finished() {
                warn!(node = %node.id, "runner did not exit in {:?}, aborting", limit);
                node.handle.abort();
                aborted.push(node.id);
            }
        }
        aborted
    }
}
