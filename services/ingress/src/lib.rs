//! Ingress service library crate.
//!
//! # Purpose
//! Exposes the connection-and-dispatch engine (identity extraction, socket
//! registry, socket manager, connectivity events, ack routing) for use by
//! the ingress binary and integration tests.
pub mod ack;
pub mod config;
pub mod connectivity;
pub mod identity;
pub mod observability;
pub mod registry;
pub mod server;
pub mod socket;
pub mod tls;
