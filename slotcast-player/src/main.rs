mod config;
mod display;
mod heartbeat;
mod media_cache;
mod mpv_client;
mod playlist;
mod playlist_sync;
mod rotation;
mod schedule;
mod session;
mod websocket_client;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::display::{Banner, Display};
use crate::media_cache::MediaCache;
use crate::mpv_client::{spawn_mpv, MpvClient, MpvDisplay};

#[derive(Parser)]
#[command(version, author = "SLOTCAST AUTHORS", about = "Slotcast Player\nLicensed under AGPLv3\nCreated by SLOTCAST AUTHORS", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Terminal name to authenticate as (overrides the configuration file)
    #[arg(short, long)]
    terminal: Option<String>,

    /// Generate a default configuration template to stdout
    #[arg(long)]
    generate_config: bool,
}

fn run_onboarding(path: &str) -> Result<Config> {
    use dialoguer::{theme::ColorfulTheme, Input};

    println!("Welcome to Slotcast Player!");
    println!("It looks like this terminal has no configuration yet.");
    println!("Let's get it connected.\n");

    let terminal_name: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Terminal Name")
        .interact_text()?;

    let server_url: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Server WebSocket URL")
        .default("ws://127.0.0.1:8080/ws".to_string())
        .interact_text()?;

    let secret_key: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Secret Key")
        .interact_text()?;

    let cache_dir: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Media Cache Directory")
        .default("cache".to_string())
        .interact_text()?;

    let config_content = format!(
        r#"terminal_name = "{}"
server_url = "{}"
secret_key = "{}"
heartbeat_interval_secs = 30
schedule_tick_secs = 15
idle_poll_secs = 5
retry_backoff_secs = 3
max_item_retries = 3
playlist_poll_interval_secs = 60
mpv_socket_path = "/tmp/slotcast-mpv-socket"
cache_dir = "{}"
"#,
        terminal_name, server_url, secret_key, cache_dir
    );

    println!("\nGenerating configuration file: {}", path);
    std::fs::write(path, &config_content)?;
    println!("Configuration saved successfully!");
    println!("----------------------------------------\n");

    let config: Config = toml::from_str(&config_content)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.generate_config {
        println!("{}", Config::default_template());
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slotcast_player=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| "config.toml".to_string());

    let mut config = if std::fs::metadata(&config_path).is_err()
        && cli.config.is_none()
        && console::user_attended()
    {
        run_onboarding(&config_path)?
    } else {
        if std::fs::metadata(&config_path).is_err() {
            eprintln!("Error: Configuration file '{}' not found.", config_path);
            eprintln!("Run with --generate-config to see a template.");
            std::process::exit(1);
        }
        Config::load(&config_path)?
    };

    if let Some(terminal) = cli.terminal {
        config.terminal_name = terminal;
    }
    tracing::info!("Loaded configuration for terminal: {}", config.terminal_name);

    let mut mpv = spawn_mpv(&config.mpv_socket_path)?;
    let display = Arc::new(MpvDisplay::new(MpvClient::new(config.mpv_socket_path.clone())));
    if let Err(e) = display.banner(&Banner::Connecting).await {
        tracing::warn!("Failed to show banner: {}", e);
    }

    let cache = Arc::new(MediaCache::new(&config.cache_dir)?);
    let cancel = CancellationToken::new();

    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupt received");
                cancel.cancel();
            }
        })
    };

    let result = session::run(Arc::new(config), display, cache, cancel).await;
    ctrl_c.abort();

    if let Err(e) = mpv.kill() {
        tracing::warn!("Failed to stop mpv: {}", e);
    }

    result
}
