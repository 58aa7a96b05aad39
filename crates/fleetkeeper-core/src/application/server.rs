//! Server Application Service
//!
//! Hosts the request state machine. Every mutation goes through `apply` (or
//! `create`), which runs the same fixed sequence:
//!
//! ```text
//! merge → record checks → credential probes → kind (status | trigger | fields)
//!       → reconcile outcome → [status refresh] → compare-and-set persist
//!       → [launch] → [notify]
//! ```
//!
//! Nothing is written unless every check passed, and nothing external is
//! started until the in-flight sentinel is committed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{
    labels, ManagedServer, ServerEvent, ServerUpdate, ServerView, UserProfile,
};
use crate::error::{ApplyError, FieldErrors};
use crate::event_bus::EventSender;
use crate::repository::{ManagedServerRepository, UserDirectory};
use crate::service::{
    status_audience, Accepted, CredentialGateway, ExitOutcome, Job, JobHandler,
    NotificationPublisher, PreparedDispatch, ProvisioningDispatcher, SshKeyPair, StatusSource,
};

use super::request_machine::{
    affects_status, credentials_to_probe, merge_fields, record_errors, MutationKind,
    HOSTNAME_FIELD, HOSTNAME_TAKEN,
};

pub struct ServerAppService {
    server_repo: Arc<dyn ManagedServerRepository>,
    users: Arc<dyn UserDirectory>,
    gateway: Arc<dyn CredentialGateway>,
    status: Arc<dyn StatusSource>,
    dispatcher: Arc<ProvisioningDispatcher>,
    publisher: NotificationPublisher,
    event_sender: EventSender,
}

impl ServerAppService {
    pub fn new(
        server_repo: Arc<dyn ManagedServerRepository>,
        users: Arc<dyn UserDirectory>,
        gateway: Arc<dyn CredentialGateway>,
        status: Arc<dyn StatusSource>,
        dispatcher: Arc<ProvisioningDispatcher>,
        event_sender: EventSender,
    ) -> Self {
        Self {
            server_repo,
            users,
            gateway,
            status,
            dispatcher,
            publisher: NotificationPublisher::new(event_sender.clone()),
            event_sender,
        }
    }

    /// Read entry point: current fields without secrets.
    pub async fn get(&self, id: &Uuid) -> anyhow::Result<Option<ServerView>> {
        Ok(self.server_repo.get(id).await?.map(|s| s.view()))
    }

    pub async fn list_for_user(&self, user_id: i64) -> anyhow::Result<Vec<ServerView>> {
        Ok(self
            .server_repo
            .list_for_user(user_id)
            .await?
            .iter()
            .map(ManagedServer::view)
            .collect())
    }

    /// Create a server for `user_id` from the plain fields of `update`.
    ///
    /// A missing hostname becomes `<username>.<timestamp>.unconfigured`.
    /// Triggers and outcome labels are not processed on creation.
    ///
    /// Emits: `ServerCreated`
    pub async fn create(
        &self,
        user_id: i64,
        update: ServerUpdate,
    ) -> Result<ManagedServer, ApplyError> {
        let owner = self.owner(user_id).await;
        let mut server = ManagedServer::new(user_id, "");
        merge_fields(&mut server, &update);
        server.user_id = user_id;
        if server.hostname.is_empty() {
            server.hostname = ManagedServer::placeholder_hostname(&owner.username, Utc::now());
        }
        if update.request.is_some() || update.request_status.is_some() {
            debug!("[ServerAppService] Ignoring request fields on create");
        }

        let mut errors = record_errors(&server, &ServerUpdate::new());
        self.check_hostname_free(&server.hostname, None, &mut errors)
            .await?;
        self.probe_credentials(&server.hostname, &update, &mut errors)
            .await;
        if !errors.is_empty() {
            return Err(ApplyError::Validation(errors));
        }

        self.ensure_keypair(&mut server, &owner)?;
        self.server_repo.insert(&server).await?;

        info!(
            server_id = %server.id,
            user_id,
            hostname = %server.hostname,
            "[ServerAppService] Created server"
        );
        self.event_sender.emit(ServerEvent::ServerCreated {
            server_id: server.id,
            user_id,
            hostname: server.hostname.clone(),
        });

        Ok(server)
    }

    /// Mutation entry point: validate, transition, persist, notify.
    ///
    /// Returns the committed entity or field-scoped errors; there is no
    /// partial success.
    ///
    /// Emits: `OperationDispatched` for accepted triggers 1 and 2,
    /// `StatusChanged` when `request_status` changed.
    pub async fn apply(&self, id: Uuid, update: ServerUpdate) -> Result<ManagedServer, ApplyError> {
        let stored = self
            .server_repo
            .get(&id)
            .await?
            .ok_or(ApplyError::NotFound(id))?;
        let kind = MutationKind::classify(&update);
        debug!(server_id = %id, ?kind, "[ServerAppService] Applying update");

        let mut candidate = stored.clone();
        merge_fields(&mut candidate, &update);

        let mut errors = record_errors(&candidate, &update);
        if candidate.hostname != stored.hostname {
            self.check_hostname_free(&candidate.hostname, Some(&id), &mut errors)
                .await?;
        }
        self.probe_credentials(&candidate.hostname, &update, &mut errors)
            .await;
        if !errors.is_empty() {
            warn!(
                server_id = %id,
                errors = ?errors.full_messages(),
                "[ServerAppService] Update rejected"
            );
            return Err(ApplyError::Validation(errors));
        }

        let now = Utc::now();
        let mut refresh = false;
        let mut prepared: Option<PreparedDispatch> = None;
        let mut server = match kind {
            MutationKind::FieldUpdate => {
                refresh = affects_status(&stored, &candidate);
                candidate
            }
            _ => stored.clone(),
        };

        match kind {
            MutationKind::StatusOnly(label) => {
                info!(server_id = %id, label, "[ServerAppService] Outcome reported");
                server.set_request_status(label, now);
            }
            MutationKind::Trigger(code) if code < 0 => {
                debug!(server_id = %id, code, "[ServerAppService] In-flight marker resubmitted, ignoring");
            }
            MutationKind::Trigger(code) => {
                let owner = self.owner(server.user_id).await;
                let plan = self.dispatcher.prepare(&server, &owner, code, now).await?;
                plan.apply_to(&mut server, now);
                prepared = Some(plan);
            }
            MutationKind::FieldUpdate => {}
        }

        if server.reconcile_outcome() && kind.reports_success() {
            refresh = true;
        }

        if !server.has_keypair() {
            let owner = self.owner(server.user_id).await;
            self.ensure_keypair(&mut server, &owner)?;
        }

        if refresh {
            match self.status.refresh(&mut server).await {
                Ok(outcome) => debug!(server_id = %id, ?outcome, "[ServerAppService] Status refreshed"),
                Err(e) => warn!(server_id = %id, "[ServerAppService] Status refresh failed: {}", e),
            }
        }

        if server != stored {
            server.updated_at = now;
        }

        if !self.server_repo.update(&server, stored.request).await? {
            warn!(server_id = %id, "[ServerAppService] Lost update race");
            return Err(ApplyError::Conflict(id));
        }

        if let Some(plan) = &prepared {
            self.launch(plan, &stored, &server).await?;
        }

        if server.request_status != stored.request_status {
            if let Some(label) = server.request_status.as_deref() {
                self.publisher.publish(
                    id,
                    label,
                    server.request_status_updated_at,
                    &status_audience(server.user_id, self.dispatcher.config().admin_user_id),
                );
            }
        }

        Ok(server)
    }

    /// Start a committed dispatch; put the stored entity back if it fails.
    async fn launch(
        &self,
        plan: &PreparedDispatch,
        stored: &ManagedServer,
        committed: &ManagedServer,
    ) -> Result<(), ApplyError> {
        match self.dispatcher.launch(plan).await {
            Ok(Accepted::Reset) => {
                info!(server_id = %committed.id, "[ServerAppService] Request reset to idle");
                Ok(())
            }
            Ok(accepted) => {
                info!(server_id = %committed.id, ?accepted, "[ServerAppService] Operation dispatched");
                self.event_sender.emit(ServerEvent::OperationDispatched {
                    server_id: committed.id,
                    operation: plan.code(),
                    last_action: committed.last_action.clone().unwrap_or_default(),
                });
                Ok(())
            }
            Err(rejected) => {
                error!(server_id = %committed.id, "[ServerAppService] Launch failed: {}", rejected);
                match self.server_repo.update(stored, committed.request).await {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        server_id = %committed.id,
                        "[ServerAppService] Could not restore server after failed launch"
                    ),
                    Err(e) => error!(
                        server_id = %committed.id,
                        "[ServerAppService] Restore after failed launch errored: {:#}",
                        e
                    ),
                }
                Err(rejected.into())
            }
        }
    }

    async fn check_hostname_free(
        &self,
        hostname: &str,
        except: Option<&Uuid>,
        errors: &mut FieldErrors,
    ) -> anyhow::Result<()> {
        if errors.has(HOSTNAME_FIELD) {
            return Ok(());
        }
        if self.server_repo.hostname_taken(hostname, except).await? {
            errors.add(HOSTNAME_FIELD, HOSTNAME_TAKEN);
        }
        Ok(())
    }

    /// Probe every credential supplied in `update`, collecting failures.
    async fn probe_credentials(&self, hostname: &str, update: &ServerUpdate, errors: &mut FieldErrors) {
        for (field, value) in credentials_to_probe(update) {
            if let Err(failure) = self.gateway.validate(field, value, hostname).await {
                errors.add(field.as_str(), failure.reason);
            }
        }
    }

    fn ensure_keypair(&self, server: &mut ManagedServer, owner: &UserProfile) -> anyhow::Result<()> {
        if server.has_keypair() {
            return Ok(());
        }
        let comment = format!("{}@{}", owner.username, self.dispatcher.config().manager_host());
        let pair = SshKeyPair::generate(&comment)?;
        server.ssh_key_public = Some(pair.public_openssh);
        server.ssh_key_private = Some(pair.private_pem);
        info!(server_id = %server.id, "[ServerAppService] Generated automation keypair");
        Ok(())
    }

    async fn owner(&self, user_id: i64) -> UserProfile {
        match self.users.get(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                warn!(user_id, "[ServerAppService] Owner not found, using placeholder");
                UserProfile::unknown(user_id)
            }
            Err(e) => {
                warn!(user_id, "[ServerAppService] Owner lookup failed: {}", e);
                UserProfile::unknown(user_id)
            }
        }
    }

    async fn report(&self, id: Uuid, label: &str) -> anyhow::Result<()> {
        self.apply(id, ServerUpdate::new().with_request_status(label))
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!("reporting '{}' for {}: {}", label, id, e))
    }
}

#[async_trait]
impl JobHandler for ServerAppService {
    async fn handle(&self, job: Job) -> anyhow::Result<()> {
        match job {
            Job::FakeUpgrade { server_id } => {
                info!(server_id = %server_id, "[JobWorker] Simulating upgrade");
                self.report(server_id, labels::PROCESSING_REBUILD).await?;
                self.report(server_id, labels::SUCCESS).await
            }
            Job::CreateDroplet { server_id } => {
                let server = self
                    .server_repo
                    .get(&server_id)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("server {} not found", server_id))?;
                let owner = self.owner(server.user_id).await;

                match self.dispatcher.run_create_droplet(&server, &owner).await {
                    Ok(ExitOutcome::Success) => {
                        info!(server_id = %server_id, "[JobWorker] Droplet install finished");
                        Ok(())
                    }
                    Ok(outcome) => {
                        warn!(server_id = %server_id, ?outcome, "[JobWorker] Droplet install failed");
                        self.report(server_id, labels::FAILED).await
                    }
                    Err(e) => {
                        warn!(server_id = %server_id, "[JobWorker] Droplet install did not start: {:#}", e);
                        self.report(server_id, labels::FAILED).await
                    }
                }
            }
        }
    }
}
