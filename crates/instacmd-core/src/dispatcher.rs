//! In-process command and event dispatch.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use instacmd_hooks::{BotEvent, ListenerHandler, ListenerId, ListenerRegistry};
use instacmd_script::{
    CommandContext, Dynamic, Owners, ScriptCallable, ScriptCommand, ScriptError, ScriptRuntime,
};
use instacmd_types::InboundMessage;

use crate::host::{BotHost, HostError};

/// Names owned by the built-in surface; snippets cannot take them.
pub const RESERVED_NAMES: &[&str] = &[
    "instantcmd",
    "instacmd",
    "instantcommand",
    "instantcmdinfo",
    "debug",
    "help",
];

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command '{0}' not found")]
    NotFound(String),
    #[error("you are not allowed to run '{0}'")]
    CheckFailed(String),
    #[error("missing permissions: {0}")]
    MissingPermissions(String),
    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// A prefixed message split into command name and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub name: String,
    /// Everything after the name, newlines kept.
    pub rest: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Returns None unless `content` starts with `prefix` directly followed
    /// by a word.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let body = content.trim_start().strip_prefix(prefix)?;
        if body.starts_with(char::is_whitespace) {
            return None;
        }
        let (name, rest) = split_first_word(body);
        if name.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            rest: rest.to_string(),
            args: rest.split_whitespace().map(str::to_string).collect(),
        })
    }
}

/// Split off the first whitespace-delimited word.
pub(crate) fn split_first_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.find(char::is_whitespace) {
        Some(pos) => (&text[..pos], text[pos..].trim_start()),
        None => (text, ""),
    }
}

#[derive(Default)]
struct CommandTable {
    by_name: HashMap<String, Arc<ScriptCommand>>,
    /// Alias to canonical name.
    aliases: HashMap<String, String>,
}

impl CommandTable {
    fn taken(&self, name: &str) -> bool {
        RESERVED_NAMES.contains(&name)
            || self.by_name.contains_key(name)
            || self.aliases.contains_key(name)
    }

    fn resolve(&self, name: &str) -> Option<Arc<ScriptCommand>> {
        let canonical = self.aliases.get(name).map_or(name, String::as_str);
        self.by_name.get(canonical).cloned()
    }
}

/// Command table, listener registry and debug environment of one bot.
pub struct Dispatcher {
    runtime: ScriptRuntime,
    dev_mode: bool,
    commands: RwLock<CommandTable>,
    listeners: ListenerRegistry,
    dev_values: RwLock<BTreeMap<String, ScriptCallable>>,
}

impl Dispatcher {
    pub fn new(runtime: ScriptRuntime, dev_mode: bool) -> Self {
        Self {
            runtime,
            dev_mode,
            commands: RwLock::new(CommandTable::default()),
            listeners: ListenerRegistry::new(),
            dev_values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.runtime.capabilities().prefix
    }

    pub fn owners(&self) -> &Owners {
        &self.runtime.capabilities().owners
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owners().contains(user_id)
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Hand an event to every subscribed listener.
    pub async fn emit(&self, event: BotEvent) -> usize {
        self.listeners.emit(event).await
    }

    /// Look a command up by name or alias.
    pub async fn lookup(&self, name: &str) -> Option<Arc<ScriptCommand>> {
        self.commands.read().await.resolve(name)
    }

    /// Canonical names of all registered commands, sorted.
    pub async fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.read().await.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Listing of the visible commands.
    pub async fn help_text(&self) -> String {
        let table = self.commands.read().await;
        let mut visible: Vec<&ScriptCommand> = table
            .by_name
            .values()
            .map(Arc::as_ref)
            .filter(|c| !c.hidden)
            .collect();
        if visible.is_empty() {
            return "No commands available.".to_string();
        }
        visible.sort_by(|a, b| a.name.cmp(&b.name));

        let mut text = String::from("Commands:\n");
        for command in visible {
            text.push_str(&format!("  {}{}", self.prefix(), command.name));
            if !command.description.is_empty() {
                text.push_str(&format!(" - {}", command.description));
            }
            text.push('\n');
        }
        text
    }

    /// Run a command on the blocking pool and collect its replies.
    ///
    /// Emits `on_command_completion` or `on_command_error` afterwards.
    pub async fn invoke(
        &self,
        invocation: &Invocation,
        message: &InboundMessage,
    ) -> Result<Vec<String>, CommandError> {
        let command = self
            .lookup(&invocation.name)
            .await
            .ok_or_else(|| CommandError::NotFound(invocation.name.clone()))?;

        let is_owner = self.is_owner(&message.author_id);
        if command.owner_only && !is_owner {
            return Err(CommandError::CheckFailed(command.name.clone()));
        }

        let ctx = CommandContext::from_message(
            message,
            self.prefix(),
            invocation.args.clone(),
            is_owner,
        );
        let name = command.name.clone();
        let result = tokio::task::spawn_blocking(move || command.invoke(&ctx))
            .await
            .map_err(|e| ScriptError::Runtime(format!("command task failed: {e}")))
            .and_then(|r| r);

        let event = match &result {
            Ok(_) => BotEvent::CommandCompletion {
                command: name,
                channel_id: message.channel_id.clone(),
                invoker_id: message.author_id.clone(),
            },
            Err(e) => BotEvent::CommandError {
                command: name,
                channel_id: message.channel_id.clone(),
                error: e.to_string(),
            },
        };
        self.emit(event).await;

        Ok(result?)
    }

    /// Evaluate code in the debug environment.
    ///
    /// Every dev value is bound by name to the result of calling it with the
    /// invoking context; `ctx` is bound to the context itself.
    pub async fn debug(
        &self,
        code: &str,
        message: &InboundMessage,
    ) -> Result<Vec<String>, CommandError> {
        if !self.dev_mode {
            return Err(CommandError::NotFound("debug".into()));
        }
        if !self.is_owner(&message.author_id) {
            return Err(CommandError::CheckFailed("debug".into()));
        }

        let ctx = CommandContext::from_message(message, self.prefix(), Vec::new(), true);
        let values: Vec<(String, ScriptCallable)> = self
            .dev_values
            .read()
            .await
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        let runtime = self.runtime.clone();
        let code = code.to_string();

        let output = tokio::task::spawn_blocking(move || -> Result<Vec<String>, ScriptError> {
            let mut bindings = Vec::with_capacity(values.len() + 1);
            for (name, value) in values {
                bindings.push((name, value.call_with_context(&ctx)?));
            }
            bindings.push(("ctx".to_string(), Dynamic::from(ctx.clone())));

            let value = runtime.eval_with_bindings(&code, bindings)?;
            let mut output = ctx.take_replies();
            if !value.is_unit() {
                output.push(value.to_string());
            }
            Ok(output)
        })
        .await
        .map_err(|e| ScriptError::Runtime(format!("debug task failed: {e}")))??;

        Ok(output)
    }
}

fn valid_command_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(char::is_whitespace)
}

/// Dev values become script variables, so they need identifier names.
fn valid_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

#[async_trait]
impl BotHost for Dispatcher {
    async fn add_command(&self, command: ScriptCommand) -> Result<(), HostError> {
        for name in std::iter::once(&command.name).chain(&command.aliases) {
            if !valid_command_name(name) {
                return Err(HostError::InvalidName(name.clone()));
            }
        }

        let mut table = self.commands.write().await;
        for name in std::iter::once(&command.name).chain(&command.aliases) {
            if table.taken(name) {
                return Err(HostError::CommandExists(name.clone()));
            }
        }

        for alias in &command.aliases {
            table.aliases.insert(alias.clone(), command.name.clone());
        }
        debug!(command = %command.name, aliases = ?command.aliases, "Command registered");
        table
            .by_name
            .insert(command.name.clone(), Arc::new(command));
        Ok(())
    }

    async fn remove_command(&self, name: &str) -> bool {
        let mut table = self.commands.write().await;
        if table.by_name.remove(name).is_none() {
            return false;
        }
        table.aliases.retain(|_, canonical| canonical != name);
        debug!(command = name, "Command unregistered");
        true
    }

    async fn add_listener(
        &self,
        event_name: &str,
        handler: ListenerHandler,
    ) -> Result<ListenerId, HostError> {
        if !valid_command_name(event_name) {
            return Err(HostError::InvalidEventName(event_name.to_string()));
        }
        Ok(self.listeners.on(event_name, handler).await)
    }

    async fn remove_listener(&self, event_name: &str, id: ListenerId) -> bool {
        self.listeners.remove(event_name, id).await
    }

    async fn add_dev_env_value(&self, name: &str, value: ScriptCallable) -> Result<(), HostError> {
        if !valid_variable_name(name) || name == "ctx" {
            return Err(HostError::InvalidName(name.to_string()));
        }
        let mut values = self.dev_values.write().await;
        if values.contains_key(name) {
            return Err(HostError::DevValueExists(name.to_string()));
        }
        values.insert(name.to_string(), value);
        info!(name, "Dev value added");
        Ok(())
    }

    async fn remove_dev_env_value(&self, name: &str) -> bool {
        self.dev_values.write().await.remove(name).is_some()
    }

    async fn dev_env_values(&self) -> Vec<String> {
        self.dev_values.read().await.keys().cloned().collect()
    }

    fn dev_mode_enabled(&self) -> bool {
        self.dev_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{compile, message, runtime};
    use instacmd_script::SnippetValue;

    fn command(runtime: &ScriptRuntime, source: &str) -> ScriptCommand {
        match compile(runtime, source).probe() {
            SnippetValue::Command(command) => command,
            other => panic!("expected a command, got {other:?}"),
        }
    }

    fn callable(runtime: &ScriptRuntime, source: &str) -> ScriptCallable {
        match compile(runtime, source).probe() {
            SnippetValue::Callable(callable) => callable,
            other => panic!("expected a callable, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_invocation() {
        let inv = Invocation::parse("!", "!add 1  2\n3").unwrap();
        assert_eq!(inv.name, "add");
        assert_eq!(inv.rest, "1  2\n3");
        assert_eq!(inv.args, vec!["1", "2", "3"]);

        assert!(Invocation::parse("!", "hello").is_none());
        assert!(Invocation::parse("!", "!").is_none());
        assert!(Invocation::parse("!", "! add").is_none());
        assert_eq!(Invocation::parse("?", "?ping").unwrap().rest, "");
    }

    #[tokio::test]
    async fn test_invoke_by_alias() {
        let (runtime, _rx) = runtime();
        let dispatcher = Dispatcher::new(runtime.clone(), false);
        let snippet = r#"
            fn ping(ctx) { "pong " + ctx.args.len() }
            return command("ping", Fn("ping"), #{ aliases: ["p"] });
        "#;
        dispatcher
            .add_command(command(&runtime, snippet))
            .await
            .unwrap();

        let msg = message("2", "!p a b");
        let inv = Invocation::parse("!", &msg.content).unwrap();
        let replies = dispatcher.invoke(&inv, &msg).await.unwrap();
        assert_eq!(replies, vec!["pong 2"]);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (runtime, _rx) = runtime();
        let dispatcher = Dispatcher::new(runtime, false);
        let msg = message("2", "!nope");
        let inv = Invocation::parse("!", &msg.content).unwrap();
        assert!(matches!(
            dispatcher.invoke(&inv, &msg).await,
            Err(CommandError::NotFound(name)) if name == "nope"
        ));
    }

    #[tokio::test]
    async fn test_owner_only_check() {
        let (runtime, _rx) = runtime();
        let dispatcher = Dispatcher::new(runtime.clone(), false);
        let snippet = r#"
            fn secret(ctx) { "ok" }
            return command("secret", Fn("secret"), #{ owner_only: true });
        "#;
        dispatcher
            .add_command(command(&runtime, snippet))
            .await
            .unwrap();

        let inv = Invocation::parse("!", "!secret").unwrap();
        assert!(matches!(
            dispatcher.invoke(&inv, &message("2", "!secret")).await,
            Err(CommandError::CheckFailed(_))
        ));
        // "1" is the configured owner.
        let replies = dispatcher.invoke(&inv, &message("1", "!secret")).await.unwrap();
        assert_eq!(replies, vec!["ok"]);
    }

    #[tokio::test]
    async fn test_script_error_surfaces() {
        let (runtime, _rx) = runtime();
        let dispatcher = Dispatcher::new(runtime.clone(), false);
        let snippet = r#"
            fn boom(ctx) { throw "broken"; }
            return command("boom", Fn("boom"));
        "#;
        dispatcher
            .add_command(command(&runtime, snippet))
            .await
            .unwrap();

        let inv = Invocation::parse("!", "!boom").unwrap();
        let err = dispatcher
            .invoke(&inv, &message("2", "!boom"))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Script(ScriptError::Runtime(_))));
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn test_rejects_collisions_and_reserved_names() {
        let (runtime, _rx) = runtime();
        let dispatcher = Dispatcher::new(runtime.clone(), false);
        let first = r#"fn a(ctx) { "a" } return command("a", Fn("a"), #{ aliases: ["x"] });"#;
        let clash = r#"fn b(ctx) { "b" } return command("b", Fn("b"), #{ aliases: ["x"] });"#;
        let reserved = r#"fn h(ctx) { "h" } return command("help", Fn("h"));"#;
        let spaced = r#"fn s(ctx) { "s" } return command("two words", Fn("s"));"#;

        dispatcher.add_command(command(&runtime, first)).await.unwrap();
        assert!(matches!(
            dispatcher.add_command(command(&runtime, clash)).await,
            Err(HostError::CommandExists(name)) if name == "x"
        ));
        assert!(matches!(
            dispatcher.add_command(command(&runtime, reserved)).await,
            Err(HostError::CommandExists(_))
        ));
        assert!(matches!(
            dispatcher.add_command(command(&runtime, spaced)).await,
            Err(HostError::InvalidName(_))
        ));
        // The failed registration left nothing behind.
        assert_eq!(dispatcher.command_names().await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_remove_command_drops_aliases() {
        let (runtime, _rx) = runtime();
        let dispatcher = Dispatcher::new(runtime.clone(), false);
        let snippet = r#"fn a(ctx) { "a" } return command("a", Fn("a"), #{ aliases: ["x"] });"#;
        dispatcher.add_command(command(&runtime, snippet)).await.unwrap();

        assert!(!dispatcher.remove_command("x").await);
        assert!(dispatcher.remove_command("a").await);
        assert!(dispatcher.lookup("x").await.is_none());
        assert!(!dispatcher.remove_command("a").await);
    }

    #[tokio::test]
    async fn test_help_hides_hidden_commands() {
        let (runtime, _rx) = runtime();
        let dispatcher = Dispatcher::new(runtime.clone(), false);
        let shown = r#"fn a(ctx) { "a" } return command("shown", Fn("a"), #{ description: "Visible" });"#;
        let hidden = r#"fn b(ctx) { "b" } return command("secret", Fn("b"), #{ hidden: true });"#;
        dispatcher.add_command(command(&runtime, shown)).await.unwrap();
        dispatcher.add_command(command(&runtime, hidden)).await.unwrap();

        let help = dispatcher.help_text().await;
        assert!(help.contains("!shown - Visible"));
        assert!(!help.contains("secret"));
    }

    #[tokio::test]
    async fn test_debug_binds_dev_values() {
        let (runtime, _rx) = runtime();
        let dispatcher = Dispatcher::new(runtime.clone(), true);
        let value = callable(&runtime, r#"fn who(ctx) { ctx.author_id } return Fn("who");"#);
        dispatcher.add_dev_env_value("who", value).await.unwrap();

        let output = dispatcher
            .debug(r#"ctx.send("hi"); "author " + who"#, &message("1", "!debug"))
            .await
            .unwrap();
        assert_eq!(output, vec!["hi", "author 1"]);
    }

    #[tokio::test]
    async fn test_debug_requires_dev_mode_and_owner() {
        let (runtime, _rx) = runtime();
        let disabled = Dispatcher::new(runtime.clone(), false);
        assert!(matches!(
            disabled.debug("1", &message("1", "!debug 1")).await,
            Err(CommandError::NotFound(_))
        ));

        let enabled = Dispatcher::new(runtime, true);
        assert!(matches!(
            enabled.debug("1", &message("2", "!debug 1")).await,
            Err(CommandError::CheckFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_dev_value_names() {
        let (runtime, _rx) = runtime();
        let dispatcher = Dispatcher::new(runtime.clone(), true);
        let value = callable(&runtime, r#"fn v(ctx) { 1 } return Fn("v");"#);

        assert!(matches!(
            dispatcher.add_dev_env_value("not valid", value.clone()).await,
            Err(HostError::InvalidName(_))
        ));
        dispatcher.add_dev_env_value("v", value.clone()).await.unwrap();
        assert!(matches!(
            dispatcher.add_dev_env_value("v", value).await,
            Err(HostError::DevValueExists(_))
        ));
        assert_eq!(dispatcher.dev_env_values().await, vec!["v"]);
        assert!(dispatcher.remove_dev_env_value("v").await);
        assert!(!dispatcher.remove_dev_env_value("v").await);
    }
}
