//! Serenity EventHandler that routes Discord events into instacmd.

use std::sync::Arc;

use serenity::async_trait;
use serenity::model::channel::{Message, Reaction};
use serenity::model::gateway::Ready;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use serenity::prelude::*;
use tracing::{debug, info, warn};

use instacmd_core::{Admin, CommandError, Conversation, Dispatcher, Invocation};
use instacmd_hooks::BotEvent;
use instacmd_types::cleanup_code;

use crate::conversation::DiscordConversation;

/// Serenity event handler bridging Discord into the dispatcher and the
/// operator surface.
pub struct DiscordHandler {
    pub dispatcher: Arc<Dispatcher>,
    pub admin: Arc<Admin>,
    pub http_client: Arc<reqwest::Client>,
}

/// Built-in command a message resolved to.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    Help,
    Debug(String),
    Snippet,
}

fn route(invocation: &Invocation) -> Route {
    match invocation.name.as_str() {
        "help" => Route::Help,
        "debug" => Route::Debug(cleanup_code(&invocation.rest)),
        _ => Route::Snippet,
    }
}

impl DiscordHandler {
    async fn run_command(&self, conv: &DiscordConversation, invocation: Invocation) {
        let result = match route(&invocation) {
            Route::Help => {
                let help = self.dispatcher.help_text().await;
                conv.say_paged(&help).await.map_err(CommandError::from)
            }
            Route::Debug(code) => self.run_debug(conv, &code).await,
            Route::Snippet => match self.dispatcher.invoke(&invocation, conv.message()).await {
                Ok(replies) => self.say_all(conv, &replies).await,
                Err(e) => Err(e),
            },
        };

        if let Err(e) = result {
            self.report(conv, &invocation.name, e).await;
        }
    }

    async fn run_debug(&self, conv: &DiscordConversation, code: &str) -> Result<(), CommandError> {
        match self.dispatcher.debug(code, conv.message()).await {
            Ok(output) if output.is_empty() => Ok(()),
            Ok(output) => conv.say_code(&output.join("\n"), "").await.map_err(Into::into),
            Err(CommandError::Script(e)) => {
                conv.say_code(&e.to_string(), "").await.map_err(Into::into)
            }
            Err(e) => Err(e),
        }
    }

    async fn say_all(
        &self,
        conv: &DiscordConversation,
        replies: &[String],
    ) -> Result<(), CommandError> {
        for reply in replies.iter().filter(|r| !r.is_empty()) {
            conv.say_paged(reply).await?;
        }
        Ok(())
    }

    async fn report(&self, conv: &DiscordConversation, name: &str, error: CommandError) {
        match &error {
            CommandError::NotFound(_) | CommandError::CheckFailed(_) => {
                debug!(command = %name, "Command not run: {error}");
                return;
            }
            _ => {}
        }

        let command = match self.dispatcher.lookup(name).await {
            Some(command) => command.name.clone(),
            None => name.to_string(),
        };
        let manager = self.admin.manager();
        if let Some(hint) = manager.report_command_error(&command, &error).await {
            if let Err(e) = conv.say(hint).await {
                warn!(command = %command, "Could not send permissions hint: {e}");
            }
        }
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn message(&self, ctx: Context, msg: Message) {
        // Skip messages from bots
        if msg.author.bot {
            return;
        }

        let conv = DiscordConversation::new(ctx, msg, self.http_client.clone());
        self.dispatcher
            .emit(BotEvent::Message {
                message: conv.message().clone(),
            })
            .await;

        let Some(invocation) = Invocation::parse(self.dispatcher.prefix(), &conv.message().content)
        else {
            return;
        };

        match self.admin.handle_message(&conv).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                self.report(&conv, &invocation.name, e.into()).await;
                return;
            }
        }

        debug!(
            channel_id = %conv.message().channel_id,
            command = %invocation.name,
            "Dispatching command"
        );
        self.run_command(&conv, invocation).await;
    }

    async fn message_delete(
        &self,
        _ctx: Context,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        _guild_id: Option<GuildId>,
    ) {
        self.dispatcher
            .emit(BotEvent::MessageDelete {
                channel_id: channel_id.to_string(),
                message_id: deleted_message_id.to_string(),
            })
            .await;
    }

    async fn reaction_add(&self, _ctx: Context, reaction: Reaction) {
        let user_id = reaction.user_id.map(|id| id.to_string()).unwrap_or_default();
        self.dispatcher
            .emit(BotEvent::ReactionAdd {
                channel_id: reaction.channel_id.to_string(),
                message_id: reaction.message_id.to_string(),
                user_id,
                emoji: reaction.emoji.to_string(),
            })
            .await;
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            bot_name = %ready.user.name,
            guilds = ready.guilds.len(),
            "Discord bot connected and ready"
        );

        let owners = self.dispatcher.owners();
        if owners.is_empty() {
            match ctx.http.get_current_application_info().await {
                Ok(app) => match app.owner {
                    Some(owner) => {
                        info!(owner_id = %owner.id, "Using application owner as bot owner");
                        owners.replace(vec![owner.id.to_string()]);
                    }
                    None => warn!("No owners configured and the application has no owner"),
                },
                Err(e) => warn!("Failed to fetch application info for owner fallback: {e}"),
            }
        }

        self.dispatcher
            .emit(BotEvent::Ready {
                user_name: ready.user.name.clone(),
                guild_count: ready.guilds.len(),
            })
            .await;
    }
}
