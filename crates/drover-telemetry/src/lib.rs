//! Transport-independent telemetry core.
//!
//! # Purpose
//! Owns the decoded record model, the per-connection frame serializer, and
//! the topic fan-out engine. The service crate layers sockets, identity,
//! and acknowledgement routing on top of these types.
//!
//! # Notes
//! Nothing in this crate touches the network; loops and sinks are driven
//! by the caller, which keeps every piece testable in isolation.
pub mod dispatch;
pub mod record;
pub mod serializer;
pub mod sinks;

pub use dispatch::{DispatchEngine, Producer};
pub use record::{AckTarget, Record, RequestIdentity};
pub use serializer::BinarySerializer;

pub type Result<T> = std::result::Result<T, TelemetryError>;

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("frame decode failed: {0}")]
    Decode(#[from] drover_wire::Error),
}
