//! Library surface of the Outbound HTTP edge.
//!
//! The binary in `main.rs` wires configuration, observability and the
//! metrics recorder around [`routes::router`]; integration tests build the
//! same router over an in-memory runtime.

#![forbid(unsafe_code)]

pub mod error;
pub mod routes;
