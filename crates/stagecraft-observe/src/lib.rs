//! Observability setup for Stagecraft: structured logging and optional
//! OpenTelemetry trace export.

pub mod tracing_setup;
