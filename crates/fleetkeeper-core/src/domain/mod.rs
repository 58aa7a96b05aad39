//! Domain entities, value objects, and events
//!
//! - Entities (ManagedServer, UserProfile)
//! - Value Objects (RequestCode, RequestResult, CredentialField, ServerUpdate)
//! - Configuration (ManagerConfig)
//! - Domain Events (ServerEvent)

pub mod config;
mod event;
mod managed_server;
mod request;
mod update;
mod user;

pub use config::ManagerConfig;
pub use event::ServerEvent;
pub use managed_server::{CredentialField, ManagedServer, ServerView};
pub use request::{labels, outcome_for_label, LabelOutcome, RequestCode, RequestResult};
pub use update::ServerUpdate;
pub use user::UserProfile;
