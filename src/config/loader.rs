//! Configuration loading.
//!
//! Precedence: explicit path in `GAMEBUDDIES_CONFIG`, then `./config.json`,
//! then code defaults. Missing fields fall back per-field via serde defaults,
//! so a partial file only overrides what it names.

use std::path::Path;

use super::types::Config;
use super::validation::validate_config_security;

const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Load configuration, logging (not failing) on validation problems.
pub fn load() -> Config {
    let path = std::env::var("GAMEBUDDIES_CONFIG")
        .unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let config = load_from_path(Path::new(&path));

    if let Err(problems) = validate_config_security(&config) {
        eprintln!("Configuration validation warnings:\n{problems}");
    }

    config
}

/// Load from a specific path, falling back to defaults when the file is
/// missing or unreadable. A present-but-malformed file is reported and the
/// defaults are used so a typo cannot silently change production behavior.
pub fn load_from_path(path: &Path) -> Config {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<Config>(&contents) {
            Ok(config) => config,
            Err(err) => {
                eprintln!(
                    "Failed to parse config file '{}': {err}; using defaults",
                    path.display()
                );
                Config::default()
            }
        },
        Err(_) => Config::default(),
    }
}
