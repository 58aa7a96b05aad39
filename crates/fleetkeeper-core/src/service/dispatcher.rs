//! Provisioning Dispatcher
//!
//! Turns an accepted trigger into an external operation. Dispatch is split in
//! two so the caller can commit the in-flight sentinel between them:
//!
//! 1. `prepare` checks the single-flight guard, writes the inventory artifact
//!    and decides what will run.
//! 2. `launch` starts the process or enqueues the job and returns at once.
//!
//! Completion is never awaited here. It comes back later as an outcome label.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::{labels, ManagedServer, ManagerConfig, RequestCode, UserProfile};
use crate::error::DispatchRejected;

use super::inventory::{InventoryWriter, WrittenInventory};
use super::job_queue::{Job, JobQueue};
use super::runner::{ExitOutcome, ExternalCommand, ExternalRunner};

pub const UPGRADE_ACTION: &str = "Process rebuild/upgrade";
pub const PROVISION_ACTION: &str = "Create droplet";

/// What `launch` set in motion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accepted {
    /// Trigger 0: sentinel cleared, nothing started
    Reset,
    /// Upgrade process running
    UpgradeStarted { pid: Option<u32> },
    /// External actions skipped, simulated upgrade queued
    UpgradeSimulated,
    /// Create-droplet job queued
    ProvisionQueued,
}

#[derive(Debug, Clone)]
enum Plan {
    Reset,
    Run(ExternalCommand),
    Enqueue(Job),
}

/// A trigger that passed the guard and is ready to launch.
#[derive(Debug, Clone)]
pub struct PreparedDispatch {
    code: RequestCode,
    plan: Plan,
    inventory: Option<WrittenInventory>,
}

impl PreparedDispatch {
    pub fn code(&self) -> RequestCode {
        self.code
    }

    pub fn last_action(&self) -> Option<&'static str> {
        match self.code {
            RequestCode::Upgrade => Some(UPGRADE_ACTION),
            RequestCode::Provision => Some(PROVISION_ACTION),
            _ => None,
        }
    }

    /// Entity changes that must be committed before `launch`.
    pub fn apply_to(&self, server: &mut ManagedServer, now: DateTime<Utc>) {
        match self.plan {
            Plan::Reset => {
                server.request = RequestCode::Idle;
            }
            Plan::Run(_) | Plan::Enqueue(_) => {
                server.request = RequestCode::InFlight;
                server.last_action = self.last_action().map(str::to_string);
                server.set_request_status(labels::PROCESSING, now);
                if let Some(inventory) = &self.inventory {
                    server.inventory = Some(inventory.text.clone());
                }
            }
        }
    }
}

pub struct ProvisioningDispatcher {
    config: ManagerConfig,
    inventories: InventoryWriter,
    runner: Arc<dyn ExternalRunner>,
    jobs: Arc<dyn JobQueue>,
}

impl ProvisioningDispatcher {
    pub fn new(
        config: ManagerConfig,
        runner: Arc<dyn ExternalRunner>,
        jobs: Arc<dyn JobQueue>,
    ) -> Self {
        Self {
            inventories: InventoryWriter::new(&config),
            config,
            runner,
            jobs,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Check the guard for `trigger` and stage the artifact.
    pub async fn prepare(
        &self,
        server: &ManagedServer,
        owner: &UserProfile,
        trigger: i64,
        now: DateTime<Utc>,
    ) -> Result<PreparedDispatch, DispatchRejected> {
        let code = RequestCode::from_i64(trigger)
            .filter(|code| !code.is_in_flight())
            .ok_or(DispatchRejected::InvalidTrigger(trigger))?;

        if code.is_operation() && server.request.is_in_flight() {
            warn!(
                server_id = %server.id,
                trigger,
                "[Dispatcher] Rejected: operation already in flight"
            );
            return Err(DispatchRejected::InFlight);
        }

        let (plan, inventory) = match code {
            RequestCode::Idle | RequestCode::InFlight => (Plan::Reset, None),
            RequestCode::Upgrade => {
                let inventory = self
                    .inventories
                    .write_upgrade(server, owner, now)
                    .await
                    .map_err(|e| DispatchRejected::Artifact(format!("{:#}", e)))?;
                let plan = if self.config.skip_actions {
                    info!(server_id = %server.id, "[Dispatcher] Skip actions set, simulating upgrade");
                    Plan::Enqueue(Job::FakeUpgrade {
                        server_id: server.id,
                    })
                } else {
                    Plan::Run(self.upgrade_command(&inventory))
                };
                (plan, Some(inventory))
            }
            RequestCode::Provision => (
                Plan::Enqueue(Job::CreateDroplet {
                    server_id: server.id,
                }),
                None,
            ),
        };

        Ok(PreparedDispatch {
            code,
            plan,
            inventory,
        })
    }

    /// Start what `prepare` planned. Never waits for completion.
    pub async fn launch(&self, prepared: &PreparedDispatch) -> Result<Accepted, DispatchRejected> {
        match &prepared.plan {
            Plan::Reset => Ok(Accepted::Reset),
            Plan::Run(command) => {
                info!("[Dispatcher] Launching {}", command.display());
                let handle = self
                    .runner
                    .run(command)
                    .await
                    .map_err(|e| DispatchRejected::Launch(format!("{:#}", e)))?;
                Ok(Accepted::UpgradeStarted { pid: handle.pid })
            }
            Plan::Enqueue(job) => {
                info!(kind = job.kind(), server_id = %job.server_id(), "[Dispatcher] Queueing job");
                self.jobs
                    .enqueue(job.clone())
                    .await
                    .map_err(|e| DispatchRejected::Launch(format!("{:#}", e)))?;
                Ok(match job {
                    Job::FakeUpgrade { .. } => Accepted::UpgradeSimulated,
                    Job::CreateDroplet { .. } => Accepted::ProvisionQueued,
                })
            }
        }
    }

    /// `prepare`, `apply_to` and `launch` in one go, for callers without a
    /// persistence step in between.
    pub async fn dispatch(
        &self,
        server: &mut ManagedServer,
        owner: &UserProfile,
        trigger: i64,
    ) -> Result<Accepted, DispatchRejected> {
        let now = Utc::now();
        let prepared = self.prepare(server, owner, trigger, now).await?;
        prepared.apply_to(server, now);
        self.launch(&prepared).await
    }

    fn upgrade_command(&self, inventory: &WrittenInventory) -> ExternalCommand {
        ExternalCommand::new(&self.config.upgrade_playbook)
            .arg("--vault-password-file")
            .arg(self.config.vault_file.display().to_string())
            .arg("-i")
            .arg(inventory.path.display().to_string())
            .log_to(&self.config.upgrade_log)
    }

    /// Body of the create-droplet job: key files, droplet inventory, install
    /// run. Waits for the install to exit.
    pub async fn run_create_droplet(
        &self,
        server: &ManagedServer,
        owner: &UserProfile,
    ) -> anyhow::Result<ExitOutcome> {
        info!(server_id = %server.id, hostname = %server.hostname, "[Dispatcher] Creating droplet");
        let keys = self.inventories.write_key_files(server).await?;
        let inventory = self
            .inventories
            .write_droplet(server, owner, &keys, Utc::now())
            .await?;

        let command = ExternalCommand::new(&self.config.install_command)
            .arg("-i")
            .arg(inventory.path.display().to_string())
            .arg("--vault-password-file")
            .arg(self.config.vault_file.display().to_string())
            .log_to(&self.config.upgrade_log);

        let handle = self.runner.run(&command).await?;
        let outcome = handle.wait().await;
        info!(server_id = %server.id, "[Dispatcher] Install finished: {:?}", outcome);
        Ok(outcome)
    }
}
