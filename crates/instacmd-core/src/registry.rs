//! Registration classifier: what a compiled snippet becomes, and how it is
//! attached to and detached from the host.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use instacmd_hooks::{BotEvent, ListenerHandler, ListenerId};
use instacmd_script::{CompiledSnippet, ScriptCallable, ScriptCommand, ScriptListener, SnippetValue};
use instacmd_types::SnippetKind;

use crate::host::{BotHost, HostError};

#[derive(Debug, Error)]
pub enum InstallError {
    /// The snippet returned something the host cannot register.
    #[error("{0}")]
    Unsupported(String),
    #[error(transparent)]
    Host(#[from] HostError),
}

/// A classified snippet, ready to install.
#[derive(Debug, Clone)]
pub enum Registration {
    Command(ScriptCommand),
    Listener(ScriptListener),
    DevValue {
        name: String,
        callable: ScriptCallable,
    },
}

impl Registration {
    /// Classify the value of a command/listener snippet.
    ///
    /// A bare function pointer becomes a listener for the event of the same
    /// name. Closures have no stable name and are rejected.
    pub fn classify(compiled: &CompiledSnippet) -> Result<Self, InstallError> {
        match compiled.probe() {
            SnippetValue::Command(command) => Ok(Self::Command(command)),
            SnippetValue::Listener(listener) => {
                if listener.callable.is_anonymous() {
                    return Err(anonymous_listener());
                }
                Ok(Self::Listener(listener))
            }
            SnippetValue::Callable(callable) => {
                if callable.is_anonymous() {
                    return Err(anonymous_listener());
                }
                Ok(Self::Listener(ScriptListener::new(callable, None)))
            }
            SnippetValue::Other(type_name) => Err(InstallError::Unsupported(format!(
                "expected a command or a function to use as listener, got {type_name}"
            ))),
        }
    }

    /// Classify the value of a dev value snippet: any function taking the
    /// context.
    pub fn classify_dev_value(name: &str, compiled: &CompiledSnippet) -> Result<Self, InstallError> {
        match compiled.probe() {
            SnippetValue::Callable(callable) => Ok(Self::DevValue {
                name: name.to_string(),
                callable,
            }),
            _ => Err(InstallError::Unsupported(format!(
                "a dev value must be a function taking the context, got {}",
                compiled.type_name()
            ))),
        }
    }

    pub fn kind(&self) -> SnippetKind {
        match self {
            Self::Command(_) => SnippetKind::Command,
            Self::Listener(_) => SnippetKind::Listener,
            Self::DevValue { .. } => SnippetKind::DevValue,
        }
    }

    /// Storage key: command name, listener function name, or dev value name.
    pub fn name(&self) -> &str {
        match self {
            Self::Command(command) => &command.name,
            Self::Listener(listener) => listener.name(),
            Self::DevValue { name, .. } => name,
        }
    }

    /// Event a listener is bound to.
    pub fn event_name(&self) -> Option<&str> {
        match self {
            Self::Listener(listener) => Some(listener.event_name()),
            _ => None,
        }
    }

    /// Attach to the host. Not retried on failure.
    pub async fn install(self, host: &dyn BotHost) -> Result<LiveRegistration, InstallError> {
        let kind = self.kind();
        let name = self.name().to_string();
        let handle = match self {
            Self::Command(command) => {
                host.add_command(command).await?;
                debug!(command = %name, "Added command");
                Handle::Command
            }
            Self::Listener(listener) => {
                let event_name = listener.event_name().to_string();
                let id = host
                    .add_listener(&event_name, listener_handler(listener))
                    .await?;
                if event_name != name {
                    debug!(listener = %name, event = %event_name, %id, "Added listener for event");
                } else {
                    debug!(listener = %name, %id, "Added listener");
                }
                Handle::Listener { event_name, id }
            }
            Self::DevValue { name, callable } => {
                host.add_dev_env_value(&name, callable).await?;
                debug!(name = %name, "Added dev value");
                Handle::DevValue
            }
        };
        Ok(LiveRegistration { kind, name, handle })
    }
}

fn anonymous_listener() -> InstallError {
    InstallError::Unsupported(
        "listeners need a named function, use Fn(\"name\") instead of a closure".to_string(),
    )
}

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Run a listener on the blocking pool for every event it receives.
fn listener_handler(listener: ScriptListener) -> ListenerHandler {
    let listener = Arc::new(listener);
    Arc::new(move |event: BotEvent| -> BoxFuture {
        let listener = listener.clone();
        Box::pin(async move {
            let name = listener.name().to_string();
            let event_name = event.name().to_string();
            match tokio::task::spawn_blocking(move || listener.handle(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(listener = %name, event = %event_name, "Listener failed: {e}"),
                Err(e) => error!(listener = %name, event = %event_name, "Listener task failed: {e}"),
            }
        })
    })
}

#[derive(Debug, Clone)]
enum Handle {
    Command,
    Listener { event_name: String, id: ListenerId },
    DevValue,
}

/// Something currently attached to the host.
#[derive(Debug, Clone)]
pub struct LiveRegistration {
    pub kind: SnippetKind,
    pub name: String,
    handle: Handle,
}

impl LiveRegistration {
    /// Subscription handle, for listeners.
    pub fn listener_id(&self) -> Option<ListenerId> {
        match &self.handle {
            Handle::Listener { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        match &self.handle {
            Handle::Listener { event_name, .. } => Some(event_name),
            _ => None,
        }
    }

    /// Detach from the host. Returns false if the host no longer had it.
    pub async fn uninstall(&self, host: &dyn BotHost) -> bool {
        let removed = match &self.handle {
            Handle::Command => host.remove_command(&self.name).await,
            Handle::Listener { event_name, id } => host.remove_listener(event_name, *id).await,
            Handle::DevValue => host.remove_dev_env_value(&self.name).await,
        };
        if removed {
            debug!(kind = %self.kind, name = %self.name, "Removed registration");
        } else {
            warn!(kind = %self.kind, name = %self.name, "Registration was already gone from the host");
        }
        removed
    }
}
