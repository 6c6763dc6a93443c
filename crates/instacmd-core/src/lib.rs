//! instacmd-core: Runtime snippet commands and listeners.
//!
//! # Architecture
//!
//! ```text
//! operator message
//!     ↓ (admin::AdminCommand::parse)
//! Admin handler ── Conversation (prompts, attachments, replies)
//!     ↓
//! InstantCommands ── SnippetStorage (durable source text)
//!     ↓ compile → classify → install
//! BotHost (Dispatcher) ── commands, listeners, dev values
//! ```
//!
//! The [`InstantCommands`] manager is the only owner of live registrations.
//! It replays every stored snippet once at startup ([`InstantCommands::resume_all`])
//! and detaches them all at shutdown ([`InstantCommands::teardown_all`]).

pub mod admin;
pub mod conversation;
pub mod dispatcher;
pub mod host;
pub mod lifecycle;
pub mod registry;

#[cfg(test)]
mod test_support;

pub use admin::{Admin, AdminCommand};
pub use conversation::{Conversation, ConversationError};
pub use dispatcher::{CommandError, Dispatcher, Invocation};
pub use host::{BotHost, HostError};
pub use lifecycle::{
    AddOutcome, ConfirmReplace, InstantCommands, LifecycleError, Removed, ResumeReport,
    SnippetTarget,
};
pub use registry::{InstallError, LiveRegistration, Registration};

/// Hint shown when the bot lacks the permissions an admin command needs.
pub const MISSING_PERMISSIONS_HINT: &str = "I need the `Add reactions` and `Manage messages` in the current channel if you want to use this command.";
