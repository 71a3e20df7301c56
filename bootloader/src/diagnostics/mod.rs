//! Diagnostics - log backend for boot-time tracing

pub mod boot_log;
