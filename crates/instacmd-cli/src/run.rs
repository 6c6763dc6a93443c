//! `instacmd run`: wire the stack together and serve until Ctrl-C.

use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::mpsc;
use tracing::{info, warn};

use instacmd_channel_discord::DiscordBot;
use instacmd_config::{InstaCmdConfig, TOKEN_ENV};
use instacmd_core::{Admin, Dispatcher, InstantCommands};
use instacmd_script::{Capabilities, Owners, ScriptRuntime, SnippetCompiler};
use instacmd_storage::SnippetStorage;
use instacmd_types::OutboundMessage;

/// Open the snippet store, creating its directory if needed.
pub fn open_storage(config: &InstaCmdConfig) -> anyhow::Result<SnippetStorage> {
    let path = config
        .database_path()
        .context("Failed to resolve database path")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    SnippetStorage::open(&path)
        .with_context(|| format!("Failed to open snippet store at {}", path.display()))
}

/// Script runtime and compiler configured from `config`.
pub fn build_compiler(
    config: &InstaCmdConfig,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
) -> anyhow::Result<(ScriptRuntime, SnippetCompiler)> {
    let caps = Capabilities {
        prefix: config.bot.prefix.clone(),
        owners: Owners::new(&config.bot.owners),
        outbound,
    };
    let runtime = ScriptRuntime::new(caps, config.scripting.max_operations);
    let module_dir = config
        .module_dir()
        .context("Failed to resolve module directory")?;
    let compiler = SnippetCompiler::new(runtime.clone(), Some(module_dir));
    Ok((runtime, compiler))
}

pub async fn run_bot(config: InstaCmdConfig) -> anyhow::Result<()> {
    let token = config
        .bot
        .resolve_token()
        .with_context(|| format!("No bot token: set bot.token in the config or {TOKEN_ENV}"))?;

    let storage = open_storage(&config)?;
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (runtime, compiler) = build_compiler(&config, outbound_tx)?;

    let dispatcher = Arc::new(Dispatcher::new(runtime, config.bot.dev_mode));
    let manager = Arc::new(InstantCommands::new(storage, compiler, dispatcher.clone()));
    let admin = Arc::new(Admin::new(manager.clone(), config.timeouts.clone()));

    let report = manager.resume_all().await;
    if !report.failed.is_empty() {
        warn!(
            failed = report.failed.len(),
            "Some stored snippets could not be resumed"
        );
    }

    let bot = DiscordBot::new(token, dispatcher, admin);
    bot.start(outbound_rx).await?;
    info!(
        prefix = %config.bot.prefix,
        dev_mode = config.bot.dev_mode,
        "instacmd running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    bot.stop().await?;
    let detached = manager.teardown_all().await;
    info!(detached, "Instant commands detached");

    Ok(())
}
