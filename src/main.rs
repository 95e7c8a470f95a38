use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use chatops_bridge::agent::{LoopOptions, SessionLoop};
use chatops_bridge::channels::{Channel, CliChannel, TelegramChannel};
use chatops_bridge::config::{BotConfig, DEFAULT_CONFIG_PATH, TransportKind};
use chatops_bridge::logging::init_tracing;
use chatops_bridge::process::ProcessRunner;

#[derive(Parser, Debug)]
#[command(name = "chatops-bridge", version, about = "Run local commands from chat messages")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, env = "CHATOPS_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing();

    let mut config = BotConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let (rules, filter) = config.compile().context("compiling patterns")?;

    eprintln!("🤖 chatops-bridge v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {}", args.config.display());
    eprintln!("   Rules: {}", rules.len());
    eprintln!("   Contacts: {}", filter.len());
    if rules.is_empty() {
        tracing::warn!("No rules configured, every message will be ignored");
    }
    if filter.is_empty() {
        tracing::warn!("No contacts configured, every sender will be rejected");
    }
    match config.dispatch.max_concurrent {
        Some(max) => eprintln!(
            "   Dispatch: max {} concurrent ({:?} on overflow)",
            max, config.dispatch.overflow
        ),
        None => eprintln!("   Dispatch: unbounded"),
    }

    let mut runner = ProcessRunner::new();
    if let Some(dir) = config.working_dir.take() {
        eprintln!("   Working dir: {}", dir.display());
        runner = runner.with_working_dir(dir);
    }

    let channel: Arc<dyn Channel> = match config.transport {
        TransportKind::Telegram => {
            let token = config
                .password
                .take()
                .context("password is required for the telegram transport")?;
            Arc::new(TelegramChannel::new(&config.server, token, &config.user))
        }
        TransportKind::Cli => Arc::new(CliChannel::new(&config.user)),
    };
    eprintln!("   Channel: {}\n", channel.name());

    tracing::info!(
        channel = channel.name(),
        rules = rules.len(),
        contacts = filter.len(),
        "Starting chat bridge"
    );

    let options = LoopOptions {
        acknowledge: config.acknowledge,
        dispatch: config.dispatch,
    };
    let session = SessionLoop::new(channel, filter, rules, Arc::new(runner), options);
    session.run().await.context("chat session failed")?;

    Ok(())
}
