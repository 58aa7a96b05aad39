//! Centralized product naming.

/// Lowercase identifier used for data directories and file prefixes.
pub const APP_IDENTIFIER: &str = "fleetkeeper";

/// User agent sent with every outbound probe.
pub const USER_AGENT: &str = concat!("Fleetkeeper/", env!("CARGO_PKG_VERSION"));

/// Prefix of the per-server status broadcast topic.
pub const STATUS_TOPIC_PREFIX: &str = "/fleetkeeper-server-status";

/// Fallback display name for owners without a profile name.
pub const DEFAULT_OWNER_NAME: &str = "fleetkeeper user";

/// Build the broadcast topic for a server.
pub fn status_topic(server_id: &uuid::Uuid) -> String {
    format!("{}/{}", STATUS_TOPIC_PREFIX, server_id)
}
