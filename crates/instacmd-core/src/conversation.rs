//! The chat side of an operator command.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use instacmd_types::{Attachment, InboundMessage};

use crate::dispatcher::CommandError;

#[derive(Debug, Error)]
pub enum ConversationError {
    /// The platform refused an action for lack of permissions.
    #[error("missing permissions: {0}")]
    MissingPermissions(String),
    #[error("{0}")]
    Transport(String),
}

impl From<ConversationError> for CommandError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::MissingPermissions(detail) => CommandError::MissingPermissions(detail),
            ConversationError::Transport(detail) => {
                CommandError::Script(instacmd_script::ScriptError::Runtime(detail))
            }
        }
    }
}

/// One operator command in progress: the message that started it and the
/// channel it came from.
///
/// Implementations handle platform limits themselves (message length,
/// reactions, downloads).
#[async_trait]
pub trait Conversation: Send + Sync {
    /// The message that started the command.
    fn message(&self) -> &InboundMessage;

    async fn say(&self, text: &str) -> Result<(), ConversationError>;

    /// Send text that may exceed the platform's message size, split into pages.
    async fn say_paged(&self, text: &str) -> Result<(), ConversationError>;

    /// Send text as code-block pages.
    async fn say_code(&self, code: &str, language: &str) -> Result<(), ConversationError>;

    /// Ask the author a yes/no question. `None` when the wait timed out.
    async fn ask_yes_no(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Option<bool>, ConversationError>;

    /// Wait for the author's next message in the same channel. `None` when
    /// the wait timed out.
    async fn next_message(
        &self,
        timeout: Duration,
    ) -> Result<Option<InboundMessage>, ConversationError>;

    /// Download an attachment's raw bytes.
    async fn read_attachment(&self, attachment: &Attachment) -> Result<Vec<u8>, ConversationError>;
}
