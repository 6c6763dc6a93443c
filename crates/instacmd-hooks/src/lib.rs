//! instacmd-hooks: Bot events and the listener registry.
//!
//! Listeners subscribe to an event name (`on_message`, `on_ready`, ...) and
//! are handed every matching [`BotEvent`]. Each subscription gets an opaque
//! [`ListenerId`] which is the only way to remove it again.

pub mod events;
pub mod registry;

pub use events::BotEvent;
pub use registry::{ListenerHandler, ListenerId, ListenerRegistry};
