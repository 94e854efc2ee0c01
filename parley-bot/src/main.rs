//! parley-bot: connects to one IRC server, joins the configured channels and
//! answers commands.
//!
//!   !help [command]           List commands
//!   !ping                     Liveness check
//!   !whoami                   Your hostmask and access level
//!   !channels                 Joined channels (admin, private message)
//!   !join <#chan> [key]       Join a channel (admin)
//!   !part [#chan] [reason]    Leave a channel (admin)
//!   !topic <text>             Set the topic (channel operator)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parley_sdk::handlers;
use parley_sdk::session::Session;
use tracing_subscriber::EnvFilter;

use parley_bot::config::{BotConfig, Overrides};
use parley_bot::{commands, reconnect};

#[derive(Parser)]
#[command(name = "parley-bot", version, about = "Interactive IRC bot")]
struct Args {
    /// Config file (default: ~/.config/parley/bot.toml if present)
    #[arg(long, short, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// IRC server address (host:port)
    #[arg(long, env = "PARLEY_SERVER")]
    server: Option<String>,

    /// Bot nick
    #[arg(long, env = "PARLEY_NICK")]
    nick: Option<String>,

    /// Channels to join, comma-separated
    #[arg(long, env = "PARLEY_CHANNELS")]
    channels: Option<String>,

    /// Command prefix
    #[arg(long, env = "PARLEY_PREFIX")]
    prefix: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "parley_bot=info,parley_sdk=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    let mut config = BotConfig::resolve(args.config.as_deref())?;
    config.apply(Overrides {
        server: args.server,
        nick: args.nick,
        channels: args.channels,
        command_prefix: args.prefix,
    });
    let session_config = config.session_config()?;

    let commands = commands::build(&config.command_prefix, &config.admins)
        .context("building command set")?;
    let registry = handlers::registry(Arc::new(commands)).context("building handler registry")?;
    let mut session = Session::new(session_config, Arc::new(registry))?;

    tracing::info!(
        server = %config.server,
        nick = %config.nick,
        channels = ?config.channels,
        prefix = %config.command_prefix,
        "Starting parley-bot"
    );

    let handle = session.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C, quitting");
            handle.shutdown("Shutting down");
        }
    });

    reconnect::run(&mut session, config.backoff()).await;
    Ok(())
}
