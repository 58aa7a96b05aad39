//! Shared test utilities and fixtures for Fleetkeeper integration tests.

pub use fleetkeeper_core::domain::{
    labels, CredentialField, ManagedServer, ManagerConfig, RequestCode, RequestResult,
    ServerEvent, ServerUpdate, UserProfile,
};


/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Test fixture utilities
pub mod fixtures {
    use super::*;
    use std::path::Path;

    pub const OWNER_ID: i64 = 7;
    pub const ADMIN_ID: i64 = 1;
    pub const HOSTNAME: &str = "forum.example.com";

    pub fn owner() -> UserProfile {
        UserProfile::new(OWNER_ID, "alice")
            .with_name("Alice Admin")
            .with_email("alice@example.com")
    }

    /// Idle server owned by `owner()`.
    pub fn server() -> ManagedServer {
        ManagedServer::new(OWNER_ID, HOSTNAME)
    }

    /// Server with an operation already in flight.
    pub fn in_flight_server() -> ManagedServer {
        let mut server = server();
        server.request = RequestCode::InFlight;
        server.last_action = Some("Process rebuild/upgrade".to_string());
        server
    }

    /// Config whose artifacts all land under `dir`.
    pub fn config(dir: &Path) -> ManagerConfig {
        ManagerConfig {
            inventory_dir: dir.join("inventories"),
            ssh_key_dir: dir.join("keys"),
            upgrade_playbook: "/opt/fleet/upgrade.yml".to_string(),
            install_command: "/opt/fleet/do_install.yml".to_string(),
            vault_file: dir.join("vault-password.txt"),
            upgrade_log: dir.join("upgrade.log"),
            base_url: "https://manager.example.org".to_string(),
            admin_user_id: ADMIN_ID,
            probe_timeout_secs: 2,
            ..Default::default()
        }
    }
}

/// Application service harness
pub mod harness {
    use std::sync::Arc;

    use fleetkeeper_core::{
        EventReceiver, ManagerServices, ManagerServicesBuilder, ServerAppService,
    };
    use tempfile::TempDir;

    use super::fixtures;
    use super::mocks::*;
    use super::{ManagedServer, ManagerConfig};

    /// `ServerAppService` wired to mocks, with handles on every mock.
    pub struct Harness {
        pub services: ManagerServices,
        pub repo: Arc<MockServerRepository>,
        pub gateway: Arc<MockGateway>,
        pub status: Arc<MockStatusSource>,
        pub runner: Arc<RecordingRunner>,
        pub jobs: Arc<RecordingJobQueue>,
        pub config: ManagerConfig,
        _dir: TempDir,
    }

    impl Harness {
        pub fn builder() -> HarnessBuilder {
            HarnessBuilder::default()
        }

        /// Harness holding `server` and nothing else unusual.
        pub fn with_server(server: ManagedServer) -> Self {
            Self::builder().server(server).build()
        }

        pub fn service(&self) -> &Arc<ServerAppService> {
            self.services.server()
        }

        pub fn subscribe(&self) -> EventReceiver {
            self.services.subscribe()
        }

        pub fn stored(&self, server: &ManagedServer) -> ManagedServer {
            self.repo
                .snapshot(&server.id)
                .expect("server should be stored")
        }
    }

    #[derive(Default)]
    pub struct HarnessBuilder {
        servers: Vec<ManagedServer>,
        gateway: Option<MockGateway>,
        status: Option<MockStatusSource>,
        runner: Option<RecordingRunner>,
        jobs: Option<RecordingJobQueue>,
        skip_actions: bool,
    }

    impl HarnessBuilder {
        pub fn server(mut self, server: ManagedServer) -> Self {
            self.servers.push(server);
            self
        }

        pub fn gateway(mut self, gateway: MockGateway) -> Self {
            self.gateway = Some(gateway);
            self
        }

        pub fn status(mut self, status: MockStatusSource) -> Self {
            self.status = Some(status);
            self
        }

        pub fn runner(mut self, runner: RecordingRunner) -> Self {
            self.runner = Some(runner);
            self
        }

        pub fn jobs(mut self, jobs: RecordingJobQueue) -> Self {
            self.jobs = Some(jobs);
            self
        }

        pub fn skip_actions(mut self) -> Self {
            self.skip_actions = true;
            self
        }

        pub fn build(self) -> Harness {
            super::init_tracing();
            let dir = TempDir::new().expect("Failed to create temp dir");
            let config = ManagerConfig {
                skip_actions: self.skip_actions,
                ..fixtures::config(dir.path())
            };

            let mut repo = MockServerRepository::new();
            for server in self.servers {
                repo = repo.with_server(server);
            }
            let repo = Arc::new(repo);
            let users = Arc::new(MockUserDirectory::new().with_user(fixtures::owner()));
            let gateway = Arc::new(self.gateway.unwrap_or_default());
            let status = Arc::new(self.status.unwrap_or_default());
            let runner = Arc::new(self.runner.unwrap_or_default());
            let jobs = Arc::new(self.jobs.unwrap_or_default());

            let services = ManagerServicesBuilder::new()
                .with_config(config.clone())
                .with_server_repo(repo.clone())
                .with_user_directory(users)
                .with_gateway(gateway.clone())
                .with_status_source(status.clone())
                .with_runner(runner.clone())
                .with_job_queue(jobs.clone())
                .build()
                .expect("Failed to build services");

            Harness {
                services,
                repo,
                gateway,
                status,
                runner,
                jobs,
                config,
                _dir: dir,
            }
        }
    }
}

/// Database test helpers
pub mod db {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    use fleetkeeper_storage::{Database, FieldEncryptor, FileKeyProvider, MasterKeyProvider};
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    const DB_FILE: &str = "fleetkeeper.db";

    /// File-backed database plus encryptor in a temporary directory.
    pub struct TestDatabase {
        pub db: Arc<Mutex<Database>>,
        pub encryptor: Arc<FieldEncryptor>,
        db_path: PathBuf,
        _temp_dir: TempDir,
    }

    impl TestDatabase {
        pub fn new() -> Self {
            let temp_dir = TempDir::new().expect("Failed to create temp dir");
            let db_path = temp_dir.path().join(DB_FILE);
            let db = Database::open(&db_path).expect("Failed to open test database");
            let key = FileKeyProvider::new(temp_dir.path().join("master.key"))
                .get_or_create_key()
                .expect("Failed to create master key");
            let encryptor = FieldEncryptor::new(&key).expect("Failed to create encryptor");
            Self {
                db: Arc::new(Mutex::new(db)),
                encryptor: Arc::new(encryptor),
                db_path,
                _temp_dir: temp_dir,
            }
        }

        pub fn path(&self) -> &Path {
            self._temp_dir.path()
        }

        pub fn db_path(&self) -> &Path {
            &self.db_path
        }
    }

    impl Default for TestDatabase {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Async test helpers
pub mod async_helpers {
    use std::time::Duration;
    use tokio::time::timeout;

    /// Run an async operation with a timeout
    pub async fn with_timeout<F, T>(duration: Duration, f: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        timeout(duration, f).await.expect("Operation timed out")
    }

    /// Default test timeout (5 seconds)
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
}
