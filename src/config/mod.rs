//! Configuration module.
//!
//! Supports JSON configuration files with per-field serde defaults, so a
//! partial file overrides only what it names.
//!
//! - [`types`]: Root `Config` struct
//! - [`server`]: Lobby timings, grace windows, reaper thresholds
//! - [`websocket`]: Edge transport settings
//! - [`security`]: CORS, API keys, per-IP rate ceilings
//! - [`logging`]: Logging settings
//! - [`loader`] / [`validation`] / [`defaults`]: loading machinery

pub mod defaults;
pub mod loader;
pub mod logging;
pub mod security;
pub mod server;
pub mod types;
pub mod validation;
pub mod websocket;

pub use loader::load;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use security::{ApiKeyEntry, SecurityConfig};
pub use server::{GameEntry, LobbyConfig};
pub use types::Config;
pub use validation::{is_production_mode, validate_config_security};
pub use websocket::WebSocketConfig;
