//! Owner-only operator commands: `instantcmd` and `instantcmdinfo`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use instacmd_config::TimeoutConfig;
use instacmd_types::{Attachment, Collection, SnippetKind, cleanup_code};

use crate::conversation::{Conversation, ConversationError};
use crate::dispatcher::{Invocation, split_first_word};
use crate::lifecycle::{AddOutcome, ConfirmReplace, InstantCommands, LifecycleError, SnippetTarget};
use crate::registry::LiveRegistration;

const GROUP_NAMES: &[&str] = &["instantcmd", "instacmd", "instantcommand"];

const NEW_COMMAND_INTRO: &str = "You're about to create a new command.\n\
    Your next message will be the code of the command.\n\n\
    The code must end with `return command(...)`, `return listener(...)` \
    or `return Fn(\"name\")`.";

const NEW_VALUE_INTRO: &str = "You're about to add a new value to the dev environment.\n\
    Your next message will be the code returning that value.\n\n\
    The code must return a function taking the context as its only parameter.";

const DECODE_WARNING: &str =
    ":warning: Failed to decode the file, all invalid characters will be replaced.";

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Usage,
    Create { code: Option<String> },
    Delete { name: String },
    List,
    Source { name: String },
    EnvUsage,
    EnvAdd { name: String, code: Option<String> },
    EnvDelete { name: String },
    EnvList,
    EnvSource { name: String },
    Info,
}

impl AdminCommand {
    /// None if the invocation is not an operator command.
    pub fn parse(invocation: &Invocation) -> Option<Self> {
        if invocation.name == "instantcmdinfo" {
            return Some(Self::Info);
        }
        if !GROUP_NAMES.contains(&invocation.name.as_str()) {
            return None;
        }

        let (sub, rest) = split_first_word(&invocation.rest);
        let command = match sub {
            "create" | "add" => Self::Create {
                code: non_empty(rest),
            },
            "delete" | "del" | "remove" => match first_word(rest) {
                Some(name) => Self::Delete { name },
                None => Self::Usage,
            },
            "list" => Self::List,
            "source" => match first_word(rest) {
                Some(name) => Self::Source { name },
                None => Self::Usage,
            },
            "env" => Self::parse_env(rest),
            _ => Self::Usage,
        };
        Some(command)
    }

    fn parse_env(text: &str) -> Self {
        let (sub, rest) = split_first_word(text);
        let (name, code) = split_first_word(rest);
        let name = (!name.is_empty()).then(|| name.to_string());
        match (sub, name) {
            ("add", Some(name)) => Self::EnvAdd {
                name,
                code: non_empty(code),
            },
            ("delete" | "del" | "remove", Some(name)) => Self::EnvDelete { name },
            ("list", _) => Self::EnvList,
            ("source", Some(name)) => Self::EnvSource { name },
            _ => Self::EnvUsage,
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn first_word(text: &str) -> Option<String> {
    text.split_whitespace().next().map(str::to_string)
}

/// Replacement prompt over a conversation.
///
/// A transport failure is kept so the caller can surface it after the
/// lifecycle call returns.
struct ReplacePrompt<'a> {
    conv: &'a dyn Conversation,
    timeout: Duration,
    failure: Mutex<Option<ConversationError>>,
}

impl<'a> ReplacePrompt<'a> {
    fn new(conv: &'a dyn Conversation, timeout: Duration) -> Self {
        Self {
            conv,
            timeout,
            failure: Mutex::new(None),
        }
    }

    fn take_failure(&self) -> Option<ConversationError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn fail(&self, err: ConversationError) -> bool {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
        false
    }
}

#[async_trait]
impl ConfirmReplace for ReplacePrompt<'_> {
    async fn confirm_replace(&self, kind: SnippetKind, _name: &str) -> bool {
        let prompt = format!(
            "That {kind} is already registered with InstantCommands. Would you like to replace it?"
        );
        match self.conv.ask_yes_no(&prompt, self.timeout).await {
            Ok(Some(true)) => true,
            Ok(_) => match self.conv.say("Cancelled.").await {
                Ok(()) => false,
                Err(e) => self.fail(e),
            },
            Err(e) => self.fail(e),
        }
    }
}

/// Handles operator commands for one bot.
pub struct Admin {
    manager: Arc<InstantCommands>,
    timeouts: TimeoutConfig,
}

impl Admin {
    pub fn new(manager: Arc<InstantCommands>, timeouts: TimeoutConfig) -> Self {
        Self { manager, timeouts }
    }

    pub fn manager(&self) -> &Arc<InstantCommands> {
        &self.manager
    }

    fn prefix(&self) -> &str {
        &self.manager.capabilities().prefix
    }

    /// Handle the conversation's message if it is an operator command.
    ///
    /// Returns false when the message is not one. Commands from non-owners
    /// are swallowed without a reply.
    pub async fn handle_message(&self, conv: &dyn Conversation) -> Result<bool, ConversationError> {
        let message = conv.message();
        let Some(invocation) = Invocation::parse(self.prefix(), &message.content) else {
            return Ok(false);
        };
        let Some(command) = AdminCommand::parse(&invocation) else {
            return Ok(false);
        };
        if !self.manager.capabilities().owners.contains(&message.author_id) {
            debug!(
                author_id = %message.author_id,
                command = %invocation.name,
                "Ignoring operator command from non-owner"
            );
            return Ok(true);
        }
        self.handle(command, conv).await?;
        Ok(true)
    }

    pub async fn handle(
        &self,
        command: AdminCommand,
        conv: &dyn Conversation,
    ) -> Result<(), ConversationError> {
        match command {
            AdminCommand::Usage => conv.say(&self.usage()).await,
            AdminCommand::Create { code } => {
                let Some(source) = self.extract_code(conv, code.as_deref(), true).await? else {
                    return Ok(());
                };
                self.add(conv, SnippetTarget::Commands, &source).await
            }
            AdminCommand::Delete { name } => self.delete(conv, &name).await,
            AdminCommand::List => self.list(conv).await,
            AdminCommand::Source { name } => self.source(conv, &name).await,
            AdminCommand::EnvUsage => conv.say(&self.env_usage()).await,
            AdminCommand::EnvAdd { name, code } => {
                let Some(source) = self.extract_code(conv, code.as_deref(), false).await? else {
                    return Ok(());
                };
                self.add(conv, SnippetTarget::DevValue(name), &source).await
            }
            AdminCommand::EnvDelete { name } => self.env_delete(conv, &name).await,
            AdminCommand::EnvList => self.env_list(conv).await,
            AdminCommand::EnvSource { name } => self.env_source(conv, &name).await,
            AdminCommand::Info => conv.say(&info_text()).await,
        }
    }

    /// Code from the first attachment, the inline argument, or a follow-up
    /// message, in that order. None when the follow-up timed out.
    async fn extract_code(
        &self,
        conv: &dyn Conversation,
        inline: Option<&str>,
        for_command: bool,
    ) -> Result<Option<String>, ConversationError> {
        if let Some(attachment) = conv.message().attachments.first() {
            return Ok(Some(self.read_file(conv, attachment).await?));
        }
        if let Some(code) = inline {
            return Ok(Some(cleanup_code(code)));
        }

        let intro = if for_command {
            NEW_COMMAND_INTRO
        } else {
            NEW_VALUE_INTRO
        };
        conv.say(intro).await?;
        let Some(response) = conv.next_message(self.timeouts.followup()).await? else {
            conv.say("Question timed out.").await?;
            return Ok(None);
        };

        if response.content.is_empty() {
            if let Some(attachment) = response.attachments.first() {
                return Ok(Some(self.read_file(conv, attachment).await?));
            }
        }
        Ok(Some(cleanup_code(&response.content)))
    }

    async fn read_file(
        &self,
        conv: &dyn Conversation,
        attachment: &Attachment,
    ) -> Result<String, ConversationError> {
        let bytes = conv.read_attachment(attachment).await?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                error!(file = %attachment.file_name, "Failed to decode file for instant command: {e}");
                conv.say(DECODE_WARNING).await?;
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };
        Ok(cleanup_code(&text))
    }

    async fn add(
        &self,
        conv: &dyn Conversation,
        target: SnippetTarget,
        source: &str,
    ) -> Result<(), ConversationError> {
        let what = match target {
            SnippetTarget::Commands => "snippet",
            SnippetTarget::DevValue(_) => "value",
        };
        let prompt = ReplacePrompt::new(conv, self.timeouts.confirm());
        let result = self.manager.add_snippet(target, source, &prompt).await;
        if let Some(e) = prompt.take_failure() {
            return Err(e);
        }

        match result {
            Ok(AddOutcome::Added { registration, .. }) => conv.say(&added_text(&registration)).await,
            Ok(AddOutcome::Cancelled) => Ok(()),
            Err(e @ (LifecycleError::Compile(_) | LifecycleError::EmptyResult)) => {
                conv.say_paged(&format!(
                    "An exception has occurred while compiling your code:\n```\n{e}\n```"
                ))
                .await
            }
            Err(LifecycleError::Install(e)) => {
                conv.say_paged(&format!(
                    "An exception has occurred while adding the {what} to the bot:\n```\n{e}\n```"
                ))
                .await
            }
            Err(e) => self.internal_error(conv, &e).await,
        }
    }

    async fn delete(&self, conv: &dyn Conversation, name: &str) -> Result<(), ConversationError> {
        match self.manager.remove(Collection::Commands, name).await {
            Ok(removed) => {
                conv.say(&format!(
                    "The {} `{}` was successfully removed.",
                    removed.kind, removed.name
                ))
                .await
            }
            Err(LifecycleError::NotFound { .. }) => conv.say("That instant command doesn't exist").await,
            Err(e) => self.internal_error(conv, &e).await,
        }
    }

    async fn list(&self, conv: &dyn Conversation) -> Result<(), ConversationError> {
        let names = match self.manager.list(Collection::Commands).await {
            Ok(names) => names,
            Err(e) => return self.internal_error(conv, &e).await,
        };
        if names.is_empty() {
            return conv.say("No instant command created.").await;
        }

        let mut text = String::from("List of instant commands:\n```Diff\n");
        for name in &names {
            text.push_str(&format!("+ {name}\n"));
        }
        text.push_str(&format!(
            "```\nYou can show the command source code by typing `{}instacmd source <command>`",
            self.prefix()
        ));
        conv.say_paged(&text).await
    }

    async fn source(&self, conv: &dyn Conversation, name: &str) -> Result<(), ConversationError> {
        let source = match self.manager.source(Collection::Commands, name).await {
            Ok(Some(source)) => source,
            Ok(None) => return conv.say("Command not found.").await,
            Err(e) => return self.internal_error(conv, &e).await,
        };
        let prefix = match self.manager.kind_of(name).await {
            Ok(Some(SnippetKind::Command)) => self.prefix(),
            _ => "",
        };
        conv.say(&format!("Source code for `{prefix}{name}`:")).await?;
        conv.say_code(&source, "rhai").await
    }

    async fn env_delete(&self, conv: &dyn Conversation, name: &str) -> Result<(), ConversationError> {
        match self.manager.remove(Collection::DevValues, name).await {
            Ok(_) => {
                conv.say(&format!("The dev env value `{name}` was successfully removed."))
                    .await
            }
            Err(LifecycleError::NotFound { .. }) => conv.say("That value doesn't exist").await,
            Err(e) => self.internal_error(conv, &e).await,
        }
    }

    async fn env_list(&self, conv: &dyn Conversation) -> Result<(), ConversationError> {
        let values = match self.manager.list(Collection::DevValues).await {
            Ok(values) => values,
            Err(e) => return self.internal_error(conv, &e).await,
        };
        let host = self.manager.host();

        let mut text = String::from(if host.dev_mode_enabled() {
            "Dev mode is currently enabled\n\n"
        } else {
            "Dev mode is currently disabled\n\n"
        });
        text.push_str("**Registered with InstantCommands**\n");
        if values.is_empty() {
            text.push_str("Nothing set yet.");
        } else {
            text.push_str(&format!("- {}", values.join("\n- ")));
        }

        if host.dev_mode_enabled() {
            let others: Vec<String> = host
                .dev_env_values()
                .await
                .into_iter()
                .filter(|name| !values.contains(name))
                .collect();
            if !others.is_empty() {
                text.push_str(&format!(
                    "\n\n**Other dev env values**\n- {}",
                    others.join("\n- ")
                ));
            }
        }

        if !values.is_empty() {
            text.push_str(&format!(
                "\n\nYou can show the command source code by typing `{}instacmd env source <name>`",
                self.prefix()
            ));
        }
        conv.say_paged(&text).await
    }

    async fn env_source(&self, conv: &dyn Conversation, name: &str) -> Result<(), ConversationError> {
        let source = match self.manager.source(Collection::DevValues, name).await {
            Ok(Some(source)) => source,
            Ok(None) => return conv.say("Value not found.").await,
            Err(e) => return self.internal_error(conv, &e).await,
        };
        conv.say(&format!("Source code for `{name}`:")).await?;
        conv.say_code(&source, "rhai").await
    }

    async fn internal_error(
        &self,
        conv: &dyn Conversation,
        err: &LifecycleError,
    ) -> Result<(), ConversationError> {
        warn!("Operator command failed: {err}");
        conv.say(&format!("Something went wrong: {err}")).await
    }

    fn usage(&self) -> String {
        let prefix = self.prefix();
        format!(
            "Instant Commands management\n```\n\
             {prefix}instantcmd create [code]   Create a command or a listener\n\
             {prefix}instantcmd delete <name>   Remove a command or a listener\n\
             {prefix}instantcmd list            List the instant commands\n\
             {prefix}instantcmd source <name>   Show the code of a command or a listener\n\
             {prefix}instantcmd env             Manage the dev environment\n\
             ```"
        )
    }

    fn env_usage(&self) -> String {
        let prefix = self.prefix();
        format!(
            "Dev environment values, bound by name in `{prefix}debug`\n```\n\
             {prefix}instantcmd env add <name> [code]   Add a value\n\
             {prefix}instantcmd env delete <name>       Remove a value\n\
             {prefix}instantcmd env list                List the values\n\
             {prefix}instantcmd env source <name>       Show the code of a value\n\
             ```"
        )
    }
}

fn added_text(registration: &LiveRegistration) -> String {
    let name = &registration.name;
    match (registration.kind, registration.event_name()) {
        (SnippetKind::Listener, Some(event)) if event != name.as_str() => format!(
            "The listener `{name}` listening for the event `{event}` was successfully added."
        ),
        (SnippetKind::Listener, _) => format!("The listener `{name}` was successfully added."),
        (SnippetKind::Command, _) => format!("The command `{name}` was successfully added."),
        (SnippetKind::DevValue, _) => format!("The dev value `{name}` was successfully added."),
    }
}

fn info_text() -> String {
    format!(
        "instacmd\n\nVersion: {}\nAuthor: {}",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_AUTHORS").replace(':', ", ")
    )
}
