//! Discord adapter for instacmd.
//!
//! Uses serenity to connect to the Discord Gateway. Every message is
//! published as an `on_message` event, then routed to the operator surface,
//! the built-in `help`/`debug` commands, or the snippet commands.
//!
//! Messages queued by scripts through `send_message` are delivered by a
//! background task reading the runtime's outbound queue.

pub mod conversation;
pub mod handler;

use std::sync::Arc;

use anyhow::{Context as _, bail};
use serenity::Client;
use serenity::all::{GatewayIntents, Http};
use serenity::model::id::ChannelId;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use instacmd_core::{Admin, Dispatcher};
use instacmd_types::{ChannelStatus, OutboundMessage};

pub use conversation::DiscordConversation;

/// Maximum characters per Discord message (API limit is 2000).
const MAX_MESSAGE_LEN: usize = 2000;

/// Room left for the code fences `split_message` may add around a chunk.
const PAGE_LEN: usize = MAX_MESSAGE_LEN - 16;

/// Split a long message into chunks that fit within Discord's limit.
///
/// Uses a two-pass strategy:
/// 1. Split naively by paragraph -> line -> space -> hard cut.
/// 2. Fix fenced code blocks by closing/reopening ``` across chunk boundaries.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    // Pass 1: naive split
    let mut raw_chunks = Vec::new();
    let mut buf = text;

    while !buf.is_empty() {
        if buf.len() <= max_len {
            raw_chunks.push(buf.to_string());
            break;
        }

        let mut limit = max_len;
        while !buf.is_char_boundary(limit) {
            limit -= 1;
        }
        let split_at = find_split_point(&buf[..limit]);

        raw_chunks.push(buf[..split_at].to_string());
        buf = buf[split_at..].trim_start_matches('\n');
    }

    // Pass 2: inject code-fence close/reopen across chunk boundaries
    let mut chunks = Vec::new();
    let mut in_code_block = false;
    let mut code_fence = String::new();

    for raw in raw_chunks {
        let mut chunk = String::new();

        if in_code_block {
            chunk.push_str(&code_fence);
            chunk.push('\n');
        }

        chunk.push_str(&raw);

        for line in raw.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with("```") {
                if in_code_block {
                    in_code_block = false;
                    code_fence.clear();
                } else {
                    in_code_block = true;
                    code_fence = trimmed.to_string();
                }
            }
        }

        if in_code_block {
            chunk.push_str("\n```");
        }

        chunks.push(chunk);
    }

    chunks
}

/// Find the best position to split text, searching backwards from the end.
fn find_split_point(text: &str) -> usize {
    // Priority 1: paragraph break (\n\n)
    if let Some(pos) = text.rfind("\n\n") {
        if pos > 0 {
            return pos + 1;
        }
    }

    // Priority 2: line break (\n)
    if let Some(pos) = text.rfind('\n') {
        if pos > 0 {
            return pos + 1;
        }
    }

    // Priority 3: space
    if let Some(pos) = text.rfind(' ') {
        if pos > 0 {
            return pos + 1;
        }
    }

    // Priority 4: hard cut
    text.len()
}

/// Parse a Discord snowflake. Zero is not a valid id.
pub(crate) fn parse_channel_id(id: &str) -> Option<ChannelId> {
    id.parse::<u64>().ok().filter(|id| *id != 0).map(ChannelId::new)
}

/// The bot's gateway connection.
pub struct DiscordBot {
    token: String,
    dispatcher: Arc<Dispatcher>,
    admin: Arc<Admin>,
    state: Mutex<DiscordState>,
}

struct DiscordState {
    status: ChannelStatus,
    client_handle: Option<JoinHandle<()>>,
    outbound_handle: Option<JoinHandle<()>>,
    /// Serenity shard manager for graceful shutdown.
    shard_manager: Option<Arc<serenity::gateway::ShardManager>>,
}

impl DiscordBot {
    pub fn new(token: String, dispatcher: Arc<Dispatcher>, admin: Arc<Admin>) -> Self {
        Self {
            token,
            dispatcher,
            admin,
            state: Mutex::new(DiscordState {
                status: ChannelStatus::Stopped,
                client_handle: None,
                outbound_handle: None,
                shard_manager: None,
            }),
        }
    }

    /// Connect and start delivering `outbound` messages.
    pub async fn start(
        &self,
        outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    ) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        if state.status == ChannelStatus::Running {
            bail!("Discord bot is already running");
        }

        state.status = ChannelStatus::Starting;

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::GUILD_MESSAGE_REACTIONS
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::DIRECT_MESSAGE_REACTIONS
            | GatewayIntents::MESSAGE_CONTENT;

        let event_handler = handler::DiscordHandler {
            dispatcher: self.dispatcher.clone(),
            admin: self.admin.clone(),
            http_client: Arc::new(reqwest::Client::new()),
        };

        let mut client = match Client::builder(&self.token, intents)
            .event_handler(event_handler)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                state.status = ChannelStatus::Error(e.to_string());
                return Err(e).context("Failed to create Discord client");
            }
        };

        let http = client.http.clone();
        let shard_manager = client.shard_manager.clone();

        let client_handle = tokio::spawn(async move {
            if let Err(e) = client.start().await {
                tracing::error!("Discord client error: {e}");
            }
        });
        let outbound_handle = tokio::spawn(deliver_outbound(http, outbound));

        state.shard_manager = Some(shard_manager);
        state.client_handle = Some(client_handle);
        state.outbound_handle = Some(outbound_handle);
        state.status = ChannelStatus::Running;

        info!("Discord bot started");

        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;

        if let Some(shard_manager) = state.shard_manager.take() {
            shard_manager.shutdown_all().await;
        }

        if let Some(handle) = state.client_handle.take() {
            let _ = handle.await;
        }

        if let Some(handle) = state.outbound_handle.take() {
            handle.abort();
        }

        state.status = ChannelStatus::Stopped;

        info!("Discord bot stopped");

        Ok(())
    }
}

/// Deliver script messages until the queue closes.
async fn deliver_outbound(
    http: Arc<Http>,
    mut outbound: mpsc::UnboundedReceiver<OutboundMessage>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = send_text(&http, &message).await {
            warn!(channel_id = %message.channel_id, "Failed to deliver script message: {e:#}");
        }
    }
}

async fn send_text(http: &Http, message: &OutboundMessage) -> anyhow::Result<()> {
    let channel = parse_channel_id(&message.channel_id)
        .with_context(|| format!("'{}' is not a Discord channel id", message.channel_id))?;
    if message.text.is_empty() {
        return Ok(());
    }
    for chunk in split_message(&message.text, PAGE_LEN) {
        channel.say(http, chunk).await?;
    }
    Ok(())
}
