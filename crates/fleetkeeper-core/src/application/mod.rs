//! Application Services - Orchestration layer with event emission
//!
//! `ServerAppService` sits between the HTTP layer and the domain services.
//! It owns the request state machine and emits events after commits.
//!
//! # Architecture
//!
//! ```text
//! HTTP layer (excluded)
//!         │  apply(id, ServerUpdate)
//!         ▼
//! ┌──────────────────────────────────────────┐
//! │  ServerAppService (request state machine) │
//! │    ├─ CredentialGateway                   │
//! │    ├─ ProvisioningDispatcher ─▶ runner    │
//! │    │                         └▶ job queue │
//! │    ├─ StatusSource                        │
//! │    └─ NotificationPublisher ─▶ Event Bus  │
//! └──────────────────────────────────────────┘
//!         │
//!         ▼
//! Record store (ManagedServerRepository)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let mut services = ManagerServicesBuilder::new()
//!     .with_server_repo(repo)
//!     .with_user_directory(users)
//!     .with_config(settings.load_manager_config().await)
//!     .build()?;
//! services.start_job_worker();
//!
//! let server = services.server().apply(id, ServerUpdate::new().with_request(1)).await?;
//! ```

pub mod request_machine;
mod server;

pub use request_machine::MutationKind;
pub use server::ServerAppService;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::ManagerConfig;
use crate::event_bus::{EventBus, EventReceiver};
use crate::repository::{ManagedServerRepository, UserDirectory};
use crate::service::{
    run_job_worker, CredentialGateway, ExternalRunner, HttpCredentialGateway, HttpStatusPoller,
    JobHandler, JobQueue, JobReceiver, ProcessRunner, ProvisioningDispatcher, StatusSource,
    TokioJobQueue,
};

/// Builder wiring `ServerAppService` and its collaborators.
///
/// Repositories are required. Anything else left unset gets the production
/// implementation built from the config.
pub struct ManagerServicesBuilder {
    event_bus: Option<Arc<EventBus>>,
    config: ManagerConfig,
    server_repo: Option<Arc<dyn ManagedServerRepository>>,
    user_directory: Option<Arc<dyn UserDirectory>>,
    gateway: Option<Arc<dyn CredentialGateway>>,
    status: Option<Arc<dyn StatusSource>>,
    runner: Option<Arc<dyn ExternalRunner>>,
    job_queue: Option<Arc<dyn JobQueue>>,
}

impl ManagerServicesBuilder {
    pub fn new() -> Self {
        Self {
            event_bus: None,
            config: ManagerConfig::default(),
            server_repo: None,
            user_directory: None,
            gateway: None,
            status: None,
            runner: None,
            job_queue: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_server_repo(mut self, repo: Arc<dyn ManagedServerRepository>) -> Self {
        self.server_repo = Some(repo);
        self
    }

    pub fn with_user_directory(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.user_directory = Some(users);
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn CredentialGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_status_source(mut self, status: Arc<dyn StatusSource>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn ExternalRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// Use an external queue. Without one an in-process `TokioJobQueue` is
    /// created and `ManagerServices::start_job_worker` drains it.
    pub fn with_job_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.job_queue = Some(queue);
        self
    }

    pub fn build(self) -> anyhow::Result<ManagerServices> {
        let server_repo = self
            .server_repo
            .ok_or_else(|| anyhow::anyhow!("Server repository required"))?;
        let user_directory = self
            .user_directory
            .ok_or_else(|| anyhow::anyhow!("User directory required"))?;
        let event_bus = self.event_bus.unwrap_or_else(|| Arc::new(EventBus::new()));

        let gateway: Arc<dyn CredentialGateway> = match self.gateway {
            Some(gateway) => gateway,
            None => Arc::new(HttpCredentialGateway::new(self.config.clone())?),
        };
        let status: Arc<dyn StatusSource> = match self.status {
            Some(status) => status,
            None => Arc::new(HttpStatusPoller::new(self.config.clone())?),
        };
        let runner: Arc<dyn ExternalRunner> = match self.runner {
            Some(runner) => runner,
            None => Arc::new(ProcessRunner::new()),
        };
        let (job_queue, job_receiver) = match self.job_queue {
            Some(queue) => (queue, None),
            None => {
                let (queue, receiver) = TokioJobQueue::new();
                (Arc::new(queue) as Arc<dyn JobQueue>, Some(receiver))
            }
        };

        let dispatcher = Arc::new(ProvisioningDispatcher::new(
            self.config,
            runner,
            job_queue,
        ));
        let server = Arc::new(ServerAppService::new(
            server_repo,
            user_directory,
            gateway,
            status,
            dispatcher,
            event_bus.sender(),
        ));

        Ok(ManagerServices {
            event_bus,
            server,
            job_receiver,
            shutdown: CancellationToken::new(),
        })
    }
}

impl Default for ManagerServicesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wired services. Dropping this stops the in-process job worker.
pub struct ManagerServices {
    pub event_bus: Arc<EventBus>,
    server: Arc<ServerAppService>,
    job_receiver: Option<JobReceiver>,
    shutdown: CancellationToken,
}

impl ManagerServices {
    pub fn server(&self) -> &Arc<ServerAppService> {
        &self.server
    }

    /// Spawn the in-process job worker. Returns `None` when an external
    /// queue was configured or the worker is already running.
    pub fn start_job_worker(&mut self) -> Option<JoinHandle<()>> {
        let receiver = self.job_receiver.take()?;
        let handler: Arc<dyn JobHandler> = self.server.clone();
        Some(tokio::spawn(run_job_worker(
            receiver,
            handler,
            self.shutdown.child_token(),
        )))
    }

    /// Stop the job worker. Jobs already running finish on their own tasks.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!("[ManagerServices] Shutting down job worker");
            self.shutdown.cancel();
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.event_bus.subscribe()
    }
}

impl Drop for ManagerServices {
    fn drop(&mut self) {
        self.shutdown();
    }
}
