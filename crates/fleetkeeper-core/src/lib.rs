//! # Fleetkeeper Core Library
//!
//! Domain logic for managing remotely hosted application instances.
//!
//! ## Modules
//!
//! - `branding` - Product naming constants shared by logs, topics and key comments
//! - `domain` - Core entities (ManagedServer, ServerUpdate, ServerEvent, ManagerConfig)
//! - `error` - Field-scoped validation and dispatch errors
//! - `repository` - Data access traits
//! - `service` - Credential gateway, status poller, provisioning dispatcher, job queue
//! - `application` - Request state machine with event emission
//! - `event_bus` - Status notification distribution

pub mod application;
pub mod branding;
pub mod domain;
pub mod error;
pub mod event_bus;
pub mod repository;
pub mod service;

// Re-export commonly used types
pub use domain::*;
pub use error::*;
pub use repository::*;
pub use service::*;

pub use application::{ManagerServices, ManagerServicesBuilder, ServerAppService};
pub use event_bus::{create_shared_event_bus, EventBus, EventReceiver, EventSender, SharedEventBus};
