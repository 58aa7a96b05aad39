//! Notification Publisher - status broadcasts after a commit.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::branding::status_topic;
use crate::domain::ServerEvent;
use crate::event_bus::EventSender;

/// Owner first, then the administrative identity, without duplicates.
pub fn status_audience(owner_id: i64, admin_user_id: i64) -> Vec<i64> {
    if owner_id == admin_user_id {
        vec![owner_id]
    } else {
        vec![owner_id, admin_user_id]
    }
}

/// Broadcasts `request_status` changes on the server's status topic.
///
/// Delivery is at-most-once and never reports failure to the caller.
#[derive(Clone)]
pub struct NotificationPublisher {
    sender: EventSender,
}

impl NotificationPublisher {
    pub fn new(sender: EventSender) -> Self {
        Self { sender }
    }

    pub fn publish(
        &self,
        server_id: Uuid,
        status: &str,
        timestamp: Option<DateTime<Utc>>,
        audience: &[i64],
    ) {
        let topic = status_topic(&server_id);
        let delivered = self.sender.emit(ServerEvent::StatusChanged {
            server_id,
            topic: topic.clone(),
            request_status: status.to_string(),
            request_status_updated_at: timestamp,
            audience: audience.to_vec(),
        });
        debug!(
            server_id = %server_id,
            topic = %topic,
            delivered,
            "[Notifications] Published '{}'",
            status
        );
    }
}
