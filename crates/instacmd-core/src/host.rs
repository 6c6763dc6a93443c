//! Host framework interface.
//!
//! Everything the lifecycle manager installs goes through [`BotHost`]. The
//! in-process implementation is [`crate::Dispatcher`].

use async_trait::async_trait;
use thiserror::Error;

use instacmd_hooks::{ListenerHandler, ListenerId};
use instacmd_script::{ScriptCallable, ScriptCommand};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid command name '{0}'")]
    InvalidName(String),
    #[error("the command or alias '{0}' is already registered")]
    CommandExists(String),
    #[error("invalid event name '{0}'")]
    InvalidEventName(String),
    #[error("the dev value '{0}' is already registered")]
    DevValueExists(String),
}

/// Dispatch tables a snippet can be attached to.
///
/// Use `&self` for all methods; implementations keep their tables behind
/// interior mutability.
#[async_trait]
pub trait BotHost: Send + Sync {
    /// Register a command under its name and aliases.
    async fn add_command(&self, command: ScriptCommand) -> Result<(), HostError>;

    /// Remove a command and its aliases. Returns false if it was not registered.
    async fn remove_command(&self, name: &str) -> bool;

    /// Subscribe a handler to an event. The returned id is the only way to
    /// remove this subscription again.
    async fn add_listener(
        &self,
        event_name: &str,
        handler: ListenerHandler,
    ) -> Result<ListenerId, HostError>;

    /// Remove exactly one subscription.
    async fn remove_listener(&self, event_name: &str, id: ListenerId) -> bool;

    /// Expose a value to the debug environment.
    async fn add_dev_env_value(&self, name: &str, value: ScriptCallable) -> Result<(), HostError>;

    async fn remove_dev_env_value(&self, name: &str) -> bool;

    /// Names of every value in the debug environment, whoever added them.
    async fn dev_env_values(&self) -> Vec<String>;

    /// Whether the debug environment is available at all.
    fn dev_mode_enabled(&self) -> bool;
}
