//! meetsync-status: the remote presence-service client.
//! `PresenceServiceClient` is the seam the runtime talks to; `HttpStatusClient`
//! speaks the REST API and `RecordingClient` records calls for dry runs.

pub mod client;
pub mod error;
pub mod http;
pub mod recording;

pub use client::{PresenceServiceClient, validate_duration, validate_emoji};
pub use error::StatusError;
pub use http::{HttpStatusClient, HttpStatusClientConfig};
pub use recording::{RecordingClient, StatusCall};
