//! Concierge console binary - composition root.
//!
//! Ties the concierge crates into a single executable:
//! 1. Parse CLI arguments and load configuration from TOML (+ env overrides)
//! 2. Initialize tracing
//! 3. Build the token provider, permission gate and session manager
//! 4. Run the interactive console until /quit or Ctrl-C
//!
//! The avatar service is the in-process mock; it answers text messages with
//! canned replies so the full session flow can be exercised offline.

mod cli;
mod console;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use concierge_core::config::ConciergeConfig;
use concierge_permission::PermissionGate;
use concierge_session::{
    HttpTokenProvider, ManagerSettings, MockAvatarService, SessionConfig, SessionManager,
    StaticTokenProvider, TokenProvider,
};

use cli::CliArgs;
use console::{Command, Console, Flow};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let mut config = ConciergeConfig::load_or_default(&config_file);
    config.apply_env_overrides();
    config.validate()?;

    // Tracing. Logs go to stderr so they do not interleave with the console.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Concierge v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    let language = args.resolve_language(config.avatar.language)?;
    tracing::info!(
        base_url = %config.avatar.base_url,
        knowledge_base_id = %config.avatar.knowledge_base_id,
        %language,
        "Avatar settings"
    );

    // Token provider.
    let tokens: Arc<dyn TokenProvider> = match args.token.as_deref() {
        Some(token) => {
            tracing::info!("Using fixed access token");
            Arc::new(StaticTokenProvider::new(token))
        }
        None => {
            let provider = HttpTokenProvider::from_config(&config.token)?;
            tracing::info!(endpoint = %provider.endpoint(), "Using token endpoint");
            Arc::new(provider)
        }
    };

    // Microphone permission.
    let permissions = Arc::new(PermissionGate::new(Arc::new(args.microphone.backend())));
    let granted = permissions.check_permission().await;
    tracing::info!(granted, "Microphone permission checked");

    // Session manager.
    let service = MockAvatarService::new().with_reply(console::offline_reply);
    let manager = Arc::new(
        SessionManager::new(
            tokens,
            Arc::new(service),
            Arc::clone(&permissions),
            ManagerSettings::from(&config.session),
        )
        .with_config(SessionConfig::from(&config.avatar).with_language(language)),
    );

    tokio::spawn(console::print_events(manager.subscribe()));

    let mut console = Console::new(Arc::clone(&manager), language);
    if args.voice {
        console.execute(Command::Start { voice: true }).await;
    }

    println!("Type /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if console.execute(Command::parse(&line)).await == Flow::Quit {
                    break;
                }
            }
        }
    }

    manager.stop_session();
    tracing::info!("Concierge stopped");
    Ok(())
}
