//! Event Bus - fan-out of committed server changes
//!
//! `ServerAppService` emits through an `EventSender`; broadcast bridges
//! (browser push, audit log) hold an `EventReceiver` each.
//!
//! ```text
//! ServerAppService ──emit──▶ broadcast channel ──▶ push bridge
//!                                             └──▶ audit sink
//! ```
//!
//! Delivery is at-most-once: a slow receiver that lags is told how many events
//! it missed and carries on, and emitting with nobody listening is not an error.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::ServerEvent;

/// Default channel capacity for the event bus
const DEFAULT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Cloneable handle for producers.
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// New receiver that sees every event emitted after this call.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<ServerEvent>,
}

impl EventSender {
    /// Emit an event, returning how many receivers got it (0 is fine).
    pub fn emit(&self, event: ServerEvent) -> usize {
        let type_name = event.type_name();
        let server_id = event.server_id();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(
                    event_type = type_name,
                    server_id = %server_id,
                    receivers = count,
                    "[EventBus] Emitted event"
                );
                count
            }
            Err(_) => {
                debug!(
                    event_type = type_name,
                    server_id = %server_id,
                    "[EventBus] No receivers for event"
                );
                0
            }
        }
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

pub struct EventReceiver {
    receiver: broadcast::Receiver<ServerEvent>,
}

impl EventReceiver {
    /// Next event, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped_events = skipped, "[EventBus] Receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking receive; lag is skipped over.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped_events = skipped, "[EventBus] Receiver lagged on try_recv");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

pub type SharedEventBus = Arc<EventBus>;

pub fn create_shared_event_bus() -> SharedEventBus {
    Arc::new(EventBus::new())
}
