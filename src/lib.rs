#![cfg_attr(not(test), deny(clippy::panic))]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_excessive_bools,
    clippy::too_many_arguments,
    clippy::too_many_lines,
    clippy::similar_names
)]

//! # GameBuddies Server
//!
//! Lobby and session orchestrator: users gather in short-lived rooms, the
//! host hands everyone off to an external game with a bearer token, and the
//! members are shepherded back into the same lobby when the game ends.

/// Game-service API key validation
pub mod auth;

/// Server configuration and defaults
pub mod config;

/// Per-room lock registry serializing state transitions
pub mod locks;

/// Structured logging configuration
pub mod logging;

/// Metrics collection and reporting
pub mod metrics;

/// Wire message protocol and room state definitions
pub mod protocol;

/// Rate limiting implementation
pub mod rate_limit;

/// Process-local registry of live connections
pub mod registry;

/// Return-to-lobby coordination (push and poll paths)
pub mod returns;

/// Session token service for external-game handoff
pub mod session;

/// Lobby manager and reapers
pub mod server;

/// Storage abstraction (in-memory implementation)
pub mod store;

/// Transport edge: WebSocket loop and HTTP game API
pub mod websocket;
