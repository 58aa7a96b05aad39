//! Domain Events for managed servers
//!
//! Events are emitted by `ServerAppService` after a change commits and are
//! consumed by whatever broadcasts them to browsers or audit sinks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RequestCode;

/// Committed change to a managed server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A server record was created
    ServerCreated {
        server_id: Uuid,
        user_id: i64,
        hostname: String,
    },

    /// An upgrade or provision was accepted and handed off
    OperationDispatched {
        server_id: Uuid,
        operation: RequestCode,
        last_action: String,
    },

    /// `request_status` changed; broadcast to `topic` for `audience`
    StatusChanged {
        server_id: Uuid,
        topic: String,
        request_status: String,
        request_status_updated_at: Option<DateTime<Utc>>,
        audience: Vec<i64>,
    },
}

impl ServerEvent {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ServerCreated { .. } => "server_created",
            Self::OperationDispatched { .. } => "operation_dispatched",
            Self::StatusChanged { .. } => "status_changed",
        }
    }

    pub fn server_id(&self) -> Uuid {
        match self {
            Self::ServerCreated { server_id, .. }
            | Self::OperationDispatched { server_id, .. }
            | Self::StatusChanged { server_id, .. } => *server_id,
        }
    }

    pub fn is_status_change(&self) -> bool {
        matches!(self, Self::StatusChanged { .. })
    }
}
