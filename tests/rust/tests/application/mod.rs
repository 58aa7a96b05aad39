//! Application service tests
//!
//! Tests for `ServerAppService`: the request state machine, background job
//! handling and status notifications.

mod create_server;
mod request_machine;
