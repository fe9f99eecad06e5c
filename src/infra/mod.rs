//! Infrastructure adapters: HTTP surface and telemetry.

pub mod error;
pub mod http;
pub mod telemetry;
