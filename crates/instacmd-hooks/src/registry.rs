//! Listener registry — manages event subscriptions and dispatches events.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::events::BotEvent;

/// Async listener function type.
pub type ListenerHandler =
    Arc<dyn Fn(BotEvent) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Identity token of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Manages listener subscriptions and dispatches events.
pub struct ListenerRegistry {
    /// Map from event name to subscriptions, in registration order.
    handlers: RwLock<HashMap<String, Vec<(ListenerId, ListenerHandler)>>>,
}

impl ListenerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe a handler to an event name.
    pub async fn on(&self, event_name: &str, handler: ListenerHandler) -> ListenerId {
        let id = ListenerId::new();
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(event_name.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove exactly the subscription `id` from `event_name`.
    ///
    /// Other handlers on the same event are untouched. Returns false when no
    /// such subscription exists.
    pub async fn remove(&self, event_name: &str, id: ListenerId) -> bool {
        let mut handlers = self.handlers.write().await;
        let Some(list) = handlers.get_mut(event_name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(event_name);
        }
        removed
    }

    /// Number of handlers subscribed to an event name.
    pub async fn count(&self, event_name: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(event_name)
            .map_or(0, Vec::len)
    }

    /// Dispatch an event to all subscribed handlers. Returns how many were started.
    pub async fn emit(&self, event: BotEvent) -> usize {
        let handlers = self.handlers.read().await;
        let mut started = 0;

        for name in [event.name(), "*"] {
            let Some(handler_list) = handlers.get(name) else {
                continue;
            };
            for (_, handler) in handler_list {
                let event_clone = event.clone();
                let handler = handler.clone();
                tokio::spawn(async move {
                    handler(event_clone).await;
                });
                started += 1;
            }
        }

        if started > 0 {
            tracing::trace!(event = event.name(), started, "Dispatched event");
        }
        started
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
