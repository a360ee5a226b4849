//! Observability wiring for Warden.

pub mod tracing_setup;
