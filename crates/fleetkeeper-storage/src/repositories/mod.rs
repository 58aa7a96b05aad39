//! SQLite repository implementations.

mod app_settings_repository;
mod managed_server_repository;

pub use app_settings_repository::SqliteAppSettingsRepository;
pub use managed_server_repository::SqliteManagedServerRepository;
