//! Background jobs handed off by the provisioning dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    /// Build the droplet inventory and run the install command
    CreateDroplet { server_id: Uuid },
    /// Simulated upgrade used when external actions are skipped
    FakeUpgrade { server_id: Uuid },
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateDroplet { .. } => "create_droplet",
            Self::FakeUpgrade { .. } => "fake_upgrade",
        }
    }

    pub fn server_id(&self) -> Uuid {
        match self {
            Self::CreateDroplet { server_id } | Self::FakeUpgrade { server_id } => *server_id,
        }
    }
}

/// Fire-and-forget enqueue. Delivery is at-least-once from the caller's view.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job) -> anyhow::Result<()>;
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}

/// In-process queue over an unbounded tokio channel.
#[derive(Clone)]
pub struct TokioJobQueue {
    sender: mpsc::UnboundedSender<Job>,
}

/// Consumer half of a `TokioJobQueue`, given to `run_job_worker`.
pub struct JobReceiver {
    receiver: mpsc::UnboundedReceiver<Job>,
}

impl TokioJobQueue {
    pub fn new() -> (Self, JobReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, JobReceiver { receiver })
    }
}

#[async_trait]
impl JobQueue for TokioJobQueue {
    async fn enqueue(&self, job: Job) -> anyhow::Result<()> {
        debug!(kind = job.kind(), server_id = %job.server_id(), "[JobQueue] Enqueue");
        self.sender
            .send(job)
            .map_err(|e| anyhow::anyhow!("job worker is not running ({})", e.0.kind()))
    }
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<Job> {
        self.receiver.recv().await
    }
}

/// Drain the queue until `shutdown` is cancelled or every `TokioJobQueue`
/// clone is dropped.
///
/// The dispatcher holds a queue clone, so a worker whose handler reaches the
/// dispatcher only stops through `shutdown`. Jobs already running on their
/// own tasks are left to finish.
///
/// Each job runs on its own task so a long install does not hold up
/// simulated upgrades for other servers.
pub async fn run_job_worker(
    mut receiver: JobReceiver,
    handler: Arc<dyn JobHandler>,
    shutdown: CancellationToken,
) {
    info!("[JobWorker] Started");
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("[JobWorker] Shutdown requested, stopping");
                return;
            }
            job = receiver.recv() => job,
        };
        let Some(job) = job else {
            break;
        };
        let handler = Arc::clone(&handler);
        tokio::spawn(async move {
            let kind = job.kind();
            let server_id = job.server_id();
            info!(kind, server_id = %server_id, "[JobWorker] Running job");
            if let Err(e) = handler.handle(job).await {
                error!(kind, server_id = %server_id, "[JobWorker] Job failed: {:#}", e);
            }
        });
    }
    info!("[JobWorker] Queue closed, stopping");
}
