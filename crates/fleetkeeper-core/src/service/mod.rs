//! Domain services
//!
//! The leaf components the request state machine drives: credential probes,
//! status polling, provisioning dispatch and its supporting pieces.

pub mod credential_gateway;
pub mod dispatcher;
pub mod inventory;
mod job_queue;
mod keypair;
mod notification;
mod runner;
pub mod settings_service;
pub mod status_poller;

pub use credential_gateway::{build_http_client, CredentialGateway, HttpCredentialGateway};
pub use dispatcher::{
    Accepted, PreparedDispatch, ProvisioningDispatcher, PROVISION_ACTION, UPGRADE_ACTION,
};
pub use inventory::{InventoryWriter, KeyFiles, WrittenInventory};
pub use job_queue::{run_job_worker, Job, JobHandler, JobQueue, JobReceiver, TokioJobQueue};
pub use keypair::SshKeyPair;
pub use notification::{status_audience, NotificationPublisher};
pub use runner::{ExitOutcome, ExternalCommand, ExternalRunner, ProcessRunner, RunHandle};
pub use settings_service::{keys, SettingsService};
pub use status_poller::{HttpStatusPoller, PollOutcome, StatusSource};
