//! Application services: request orchestration and the upstream client.

pub mod error;
pub mod render;
pub mod upstream;
