//! HTTP and WebSocket front end for the kickoff match engine.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
