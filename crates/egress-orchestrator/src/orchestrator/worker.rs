//! Background workers spawned by upsert and teardown
//!
//! A worker is a tokio task paired with a cancellation token. Dropping the
//! handle detaches the task, so entry points return immediately unless the
//! caller chooses to wait.

use super::types::{CleanupEntry, TeardownReport};
use anyhow::{Result, anyhow};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub struct WorkerHandle<T> {
    name: &'static str,
    join: JoinHandle<Result<T>>,
    cancel: CancellationToken,
}

impl<T: Send + 'static> WorkerHandle<T> {
    /// Spawn `work` on the current runtime, handing it the worker's token.
    ///
    /// Failures are logged here since a detached worker has nobody else to
    /// report to.
    pub(crate) fn spawn<F, Fut>(name: &'static str, work: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let task = work(cancel.clone());
        let join = tokio::spawn(async move {
            let result = task.await;
            match &result {
                Ok(_) => debug!(worker = name, "Background worker finished"),
                Err(e) => error!(worker = name, error = ?e, "Background worker failed"),
            }
            result
        });
        Self { name, join, cancel }
    }
}

impl<T> WorkerHandle<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the worker to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the worker and return what it produced.
    pub async fn wait(self) -> Result<T> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(anyhow!("{} worker was aborted", self.name)),
            Err(e) => Err(anyhow!("{} worker panicked: {e}", self.name)),
        }
    }

    /// Let the worker run to completion on its own.
    pub fn detach(self) {
        debug!(worker = self.name, "Detaching background worker");
    }
}

impl<T> fmt::Debug for WorkerHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("finished", &self.join.is_finished())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// What the completion worker did once the instance came up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionReport {
    pub instance_id: String,
    pub public_ip: String,
    pub allocation_id: String,
}

/// Waits for a compute instance to run, then binds its floating IP
pub type CompletionHandle = WorkerHandle<CompletionReport>;

/// The two independent teardown workers
#[derive(Debug)]
pub struct TeardownHandle {
    pub instance: WorkerHandle<Vec<CleanupEntry>>,
    pub network: WorkerHandle<Vec<CleanupEntry>>,
}

impl TeardownHandle {
    pub fn cancel(&self) {
        self.instance.cancel();
        self.network.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.instance.is_finished() && self.network.is_finished()
    }

    /// Wait for both workers and merge their entries, instance worker first.
    pub async fn wait(self) -> Result<TeardownReport> {
        let (instance, network) = futures::join!(self.instance.wait(), self.network.wait());
        let mut report = TeardownReport::default();
        report.extend(instance?);
        report.extend(network?);
        Ok(report)
    }

    pub fn detach(self) {
        self.instance.detach();
        self.network.detach();
    }
}
