//! `Conversation` over a Discord message and its channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serenity::all::{Context, Message, ReactionType};
use serenity::http::HttpError;
use tracing::{debug, warn};

use instacmd_core::{Conversation, ConversationError};
use instacmd_types::{Attachment, InboundMessage};

use crate::{PAGE_LEN, split_message};

const YES: &str = "✅";
const NO: &str = "❎";

/// Discord's "Missing Permissions" JSON error code.
const MISSING_PERMISSIONS_CODE: isize = 50013;

pub struct DiscordConversation {
    ctx: Context,
    source: Message,
    inbound: InboundMessage,
    http_client: Arc<reqwest::Client>,
}

impl DiscordConversation {
    pub fn new(ctx: Context, source: Message, http_client: Arc<reqwest::Client>) -> Self {
        let inbound = to_inbound(&source);
        Self {
            ctx,
            source,
            inbound,
            http_client,
        }
    }

    async fn send(&self, text: &str) -> Result<Message, ConversationError> {
        self.source
            .channel_id
            .say(&self.ctx.http, text)
            .await
            .map_err(|e| conversation_error(e, "Send messages"))
    }

    async fn react(&self, prompt: &Message, emoji: &str) -> Result<(), ConversationError> {
        prompt
            .react(&self.ctx.http, ReactionType::Unicode(emoji.to_string()))
            .await
            .map(|_| ())
            .map_err(|e| conversation_error(e, "Add reactions"))
    }
}

#[async_trait]
impl Conversation for DiscordConversation {
    fn message(&self) -> &InboundMessage {
        &self.inbound
    }

    async fn say(&self, text: &str) -> Result<(), ConversationError> {
        self.send(text).await.map(|_| ())
    }

    async fn say_paged(&self, text: &str) -> Result<(), ConversationError> {
        for page in split_message(text, PAGE_LEN) {
            self.send(&page).await?;
        }
        Ok(())
    }

    async fn say_code(&self, code: &str, language: &str) -> Result<(), ConversationError> {
        self.say_paged(&format!("```{language}\n{code}\n```")).await
    }

    async fn ask_yes_no(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Option<bool>, ConversationError> {
        let prompt = self.send(prompt).await?;
        self.react(&prompt, YES).await?;
        self.react(&prompt, NO).await?;

        let reaction = prompt
            .await_reaction(&self.ctx)
            .author_id(self.source.author.id)
            .timeout(timeout)
            .filter(|reaction| answer_from_emoji(&reaction.emoji.to_string()).is_some())
            .await;

        if let Err(e) = prompt.delete_reactions(&self.ctx.http).await {
            debug!(message_id = %prompt.id, "Could not clear prompt reactions: {e}");
        }

        Ok(reaction.and_then(|reaction| answer_from_emoji(&reaction.emoji.to_string())))
    }

    async fn next_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<InboundMessage>, ConversationError> {
        let reply = self
            .source
            .channel_id
            .await_reply(&self.ctx)
            .author_id(self.source.author.id)
            .timeout(timeout)
            .await;
        Ok(reply.as_ref().map(to_inbound))
    }

    async fn read_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, ConversationError> {
        let download = async {
            let response = self
                .http_client
                .get(&attachment.url)
                .send()
                .await?
                .error_for_status()?;
            response.bytes().await
        };
        match download.await {
            Ok(bytes) => Ok(bytes.to_vec()),
            Err(e) => {
                warn!(file = %attachment.file_name, "Failed to download Discord attachment: {e}");
                Err(ConversationError::Transport(format!(
                    "failed to download {}: {e}",
                    attachment.file_name
                )))
            }
        }
    }
}

/// The answer an emoji stands for, if any.
fn answer_from_emoji(emoji: &str) -> Option<bool> {
    match emoji {
        YES => Some(true),
        NO => Some(false),
        _ => None,
    }
}

/// Classify a serenity error. `action` names the permission involved.
pub(crate) fn conversation_error(err: serenity::Error, action: &str) -> ConversationError {
    match &err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response))
            if response.error.code == MISSING_PERMISSIONS_CODE =>
        {
            ConversationError::MissingPermissions(action.to_string())
        }
        _ => ConversationError::Transport(err.to_string()),
    }
}

/// Convert a serenity message to the platform-neutral form.
pub fn to_inbound(msg: &Message) -> InboundMessage {
    InboundMessage {
        message_id: msg.id.to_string(),
        channel_id: msg.channel_id.to_string(),
        guild_id: msg.guild_id.map(|id| id.to_string()),
        author_id: msg.author.id.to_string(),
        author_name: msg.author.name.clone(),
        content: msg.content.clone(),
        attachments: msg
            .attachments
            .iter()
            .map(|att| Attachment {
                file_name: att.filename.clone(),
                url: att.url.clone(),
                content_type: att.content_type.clone(),
                size: u64::from(att.size),
            })
            .collect(),
        timestamp: msg.timestamp.unix_timestamp() * 1000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_from_emoji() {
        assert_eq!(answer_from_emoji("✅"), Some(true));
        assert_eq!(answer_from_emoji("❎"), Some(false));
        assert_eq!(answer_from_emoji("👍"), None);
    }

    #[test]
    fn test_other_errors_are_transport() {
        let err = conversation_error(serenity::Error::Other("gateway closed"), "Add reactions");
        assert!(matches!(err, ConversationError::Transport(msg) if msg.contains("gateway closed")));
    }
}
