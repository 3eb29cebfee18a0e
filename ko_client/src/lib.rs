//! Internal modules for the match client.
//!
//! This library provides command parsing, the HTTP API client, and the
//! websocket session used by the ko_client binary.

pub mod api_client;
pub mod commands;
pub mod websocket_client;
