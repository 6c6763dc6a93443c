//! instacmd-script: Snippet compiler backed by an embedded Rhai engine.
//!
//! A snippet is the body of one unit of code. Its top-level statements run
//! once at compile time and must end in `return <value>`; that value is the
//! artifact the host installs. Functions declared in the snippet stay
//! callable afterwards through the function pointers the artifact holds.
//!
//! ```rhai
//! fn hello(ctx) {
//!     ctx.send("Hello " + ctx.author + "!");
//! }
//!
//! return command("hello", Fn("hello"), #{ description: "Say hello", aliases: ["hi"] });
//! ```
//!
//! ```rhai
//! fn greet_newcomer(event) {
//!     if event.message.content == "hi" {
//!         send_message(event.message.channel_id, "welcome!");
//!     }
//! }
//!
//! return listener(Fn("greet_newcomer"), "on_message");
//! ```
//!
//! # Capabilities
//!
//! | function | returns |
//! |---|---|
//! | `command(name, fn)` / `command(name, fn, options)` | command declaration |
//! | `listener(fn)` / `listener(fn, event_name)` | listener declaration |
//! | `send_message(channel_id, text)` | posts through the bot |
//! | `prefix()`, `owners()`, `is_owner(user_id)` | bot settings |
//!
//! Command options: `description`, `aliases`, `owner_only`, `hidden`.

pub mod artifact;
pub mod capabilities;
pub mod compiler;
pub mod context;
pub mod error;

pub use artifact::{ScriptCallable, ScriptCommand, ScriptListener, SnippetValue};
pub use capabilities::{Capabilities, Owners};
pub use compiler::{CompiledSnippet, ScriptRuntime, SnippetCompiler};
pub use context::CommandContext;
pub use error::ScriptError;

/// Re-exported so hosts can build bindings without depending on rhai directly.
pub use rhai::Dynamic;
