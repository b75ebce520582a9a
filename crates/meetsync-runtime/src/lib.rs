//! meetsync runtime: the presence engine and its daemon.
//!
//! Observer bridges push environment snapshots over a Unix socket; one
//! driver task per observer turns them into join/leave transitions, and a
//! single coordinator actor mirrors the aggregate presence to the status
//! service.

pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod engine;
pub mod heartbeat;
pub mod observer;
pub mod server;
pub mod store;

pub use config::{ConfigStore, PresenceConfig};
pub use engine::{EngineError, EngineStatus, PresenceEngine};
