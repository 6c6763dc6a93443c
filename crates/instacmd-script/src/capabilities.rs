//! Host handles exposed to snippets.

use std::sync::{Arc, PoisonError, RwLock};

use rhai::{Array, Dynamic, Engine, EvalAltResult, FnPtr};
use tokio::sync::mpsc::UnboundedSender;

use instacmd_types::OutboundMessage;

use crate::artifact::{CommandSpec, ListenerSpec};
use crate::context::CommandContext;

/// Bot owner ids, shared between the script runtime and the chat adapter.
///
/// The adapter may only learn the owner after connecting, so the list is
/// mutable behind a lock.
#[derive(Debug, Clone, Default)]
pub struct Owners(Arc<RwLock<Vec<String>>>);

impl Owners {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self(Arc::new(RwLock::new(
            ids.into_iter().map(|id| id.to_string()).collect(),
        )))
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|id| id == user_id)
    }

    pub fn list(&self) -> Vec<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    pub fn replace(&self, ids: Vec<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = ids;
    }
}

/// Everything the script environment is pre-populated with.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub prefix: String,
    pub owners: Owners,
    /// Queue drained by the chat adapter.
    pub outbound: UnboundedSender<OutboundMessage>,
}

/// Register the capability table on an engine.
pub(crate) fn register(engine: &mut Engine, caps: &Capabilities) {
    engine
        .register_type_with_name::<CommandContext>("Context")
        .register_get("author", |c: &mut CommandContext| c.author_name.clone())
        .register_get("author_id", |c: &mut CommandContext| c.author_id.clone())
        .register_get("channel_id", |c: &mut CommandContext| c.channel_id.clone())
        .register_get("guild_id", |c: &mut CommandContext| match &c.guild_id {
            Some(id) => Dynamic::from(id.clone()),
            None => Dynamic::UNIT,
        })
        .register_get("content", |c: &mut CommandContext| c.content.clone())
        .register_get("args", |c: &mut CommandContext| -> Array {
            c.args.iter().cloned().map(Dynamic::from).collect()
        })
        .register_get("prefix", |c: &mut CommandContext| c.prefix.clone())
        .register_get("is_owner", |c: &mut CommandContext| c.is_owner)
        .register_fn("send", |c: &mut CommandContext, text: &str| c.send(text))
        .register_fn("to_string", |c: &mut CommandContext| {
            format!("Context(author={}, channel={})", c.author_name, c.channel_id)
        });

    engine
        .register_type_with_name::<CommandSpec>("Command")
        .register_get("name", |c: &mut CommandSpec| c.name.clone())
        .register_fn("command", CommandSpec::new)
        .register_fn("command", CommandSpec::with_options);

    engine
        .register_type_with_name::<ListenerSpec>("Listener")
        .register_get("name", |l: &mut ListenerSpec| l.fn_ptr.fn_name().to_string())
        .register_fn("listener", |fn_ptr: FnPtr| ListenerSpec {
            fn_ptr,
            event: None,
        })
        .register_fn("listener", |fn_ptr: FnPtr, event: &str| ListenerSpec {
            fn_ptr,
            event: Some(event.to_string()),
        });

    let outbound = caps.outbound.clone();
    engine.register_fn(
        "send_message",
        move |channel_id: &str, text: &str| -> Result<(), Box<EvalAltResult>> {
            outbound
                .send(OutboundMessage::text(channel_id, text))
                .map_err(|_| "the bot is shutting down, message dropped".into())
        },
    );

    let prefix = caps.prefix.clone();
    engine.register_fn("prefix", move || prefix.clone());

    let owners = caps.owners.clone();
    engine.register_fn("owners", move || -> Array {
        owners.list().into_iter().map(Dynamic::from).collect()
    });

    let owners = caps.owners.clone();
    engine.register_fn("is_owner", move |user_id: &str| owners.contains(user_id));

    engine.on_print(|text| tracing::info!(target: "instacmd::script", "{text}"));
    engine.on_debug(|text, source, pos| {
        tracing::debug!(target: "instacmd::script", source = ?source, position = %pos, "{text}")
    });
}
