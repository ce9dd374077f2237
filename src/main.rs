#![cfg_attr(not(test), deny(clippy::panic))]

use clap::Parser;
use gamebuddies_server::config;
use gamebuddies_server::logging;
use gamebuddies_server::server::LobbyServer;
use gamebuddies_server::websocket::{self, AppState};
use std::net::SocketAddr;

/// GameBuddies -- lobby and session orchestrator for external-game handoff
#[derive(Parser, Debug)]
#[command(name = "gamebuddies-server")]
#[command(about = "Lobby and session orchestrator for external-game handoff")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines and pre-deployment checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration from config.json if present; otherwise use code
    // defaults.
    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    // config::load() already reported validation problems to stderr; here we
    // capture the result for a proper exit code and to fail hard in
    // production.
    let validation_result = config::validate_config_security(&cfg);

    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.port);
                println!("  Production mode: {}", cfg.security.production);
                println!("  Default max players: {}", cfg.lobby.default_max_players);
                println!("  Host grace: {}s", cfg.lobby.host_grace_secs);
                println!("  Session token TTL: {}s", cfg.lobby.session_token_ttl_secs);
                println!("  Configured API keys: {}", cfg.security.api_keys.len());
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    if config::is_production_mode(&cfg) {
        validation_result.map_err(|e| anyhow::anyhow!("configuration invalid:\n{e}"))?;
    }

    logging::init_with_config(&cfg.logging);

    let port: u16 = cfg.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let cors_origins = cfg.security.cors_origins.clone();

    tracing::info!(%addr, "Starting GameBuddies server");

    let server = LobbyServer::new(cfg).await?;
    server.spawn_reapers();

    let state = AppState::new(server);
    let router = websocket::create_router(&cors_origins).with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        cors_origins = %cors_origins,
        "Server started - lobby socket: /ws, game API: /api, metrics: /metrics"
    );

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::Cli;
    use clap::Parser;

    #[test]
    fn test_cli_default_no_flags() {
        let cli = Cli::try_parse_from(["gamebuddies-server"]).unwrap();
        assert!(!cli.validate_config);
        assert!(!cli.print_config);
    }

    #[test]
    fn test_cli_validate_config_flags() {
        let cli = Cli::try_parse_from(["gamebuddies-server", "--validate-config"]).unwrap();
        assert!(cli.validate_config);

        let cli = Cli::try_parse_from(["gamebuddies-server", "-c"]).unwrap();
        assert!(cli.validate_config);
    }

    #[test]
    fn test_cli_print_config() {
        let cli = Cli::try_parse_from(["gamebuddies-server", "--print-config"]).unwrap();
        assert!(cli.print_config);
        assert!(!cli.validate_config);
    }

    #[test]
    fn test_cli_validate_and_print_config_conflict() {
        // --validate-config and --print-config are mutually exclusive
        let result =
            Cli::try_parse_from(["gamebuddies-server", "--validate-config", "--print-config"]);
        assert!(result.is_err());
    }
}
