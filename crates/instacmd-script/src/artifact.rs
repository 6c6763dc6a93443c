//! Values a snippet can produce, and their bound, callable forms.

use std::sync::Arc;

use rhai::{AST, Dynamic, EvalAltResult, FnPtr, Map};
use serde::Serialize;

use crate::compiler::ScriptRuntime;
use crate::context::CommandContext;
use crate::error::ScriptError;

/// `command(...)` result, before it is bound to its compiled unit.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub name: String,
    pub fn_ptr: FnPtr,
    pub description: String,
    pub aliases: Vec<String>,
    pub owner_only: bool,
    pub hidden: bool,
}

impl CommandSpec {
    pub fn new(name: &str, fn_ptr: FnPtr) -> Self {
        Self {
            name: name.to_string(),
            fn_ptr,
            description: String::new(),
            aliases: Vec::new(),
            owner_only: false,
            hidden: false,
        }
    }

    pub fn with_options(
        name: &str,
        fn_ptr: FnPtr,
        options: Map,
    ) -> Result<Self, Box<EvalAltResult>> {
        let mut spec = Self::new(name, fn_ptr);
        for (key, value) in options {
            match key.as_str() {
                "description" => {
                    spec.description = value
                        .into_string()
                        .map_err(|actual| option_type_error("description", "string", actual))?;
                }
                "aliases" => {
                    let aliases = value
                        .into_array()
                        .map_err(|actual| option_type_error("aliases", "array", actual))?;
                    for alias in aliases {
                        let alias = alias.into_string().map_err(|actual| {
                            option_type_error("aliases", "array of strings", actual)
                        })?;
                        spec.aliases.push(alias);
                    }
                }
                "owner_only" => {
                    spec.owner_only = value
                        .as_bool()
                        .map_err(|actual| option_type_error("owner_only", "bool", actual))?;
                }
                "hidden" => {
                    spec.hidden = value
                        .as_bool()
                        .map_err(|actual| option_type_error("hidden", "bool", actual))?;
                }
                other => return Err(format!("unknown command option '{other}'").into()),
            }
        }
        Ok(spec)
    }
}

fn option_type_error(option: &str, expected: &str, actual: &str) -> Box<EvalAltResult> {
    format!("command option '{option}' must be a {expected}, got {actual}").into()
}

/// `listener(...)` result, before it is bound to its compiled unit.
#[derive(Debug, Clone)]
pub struct ListenerSpec {
    pub fn_ptr: FnPtr,
    pub event: Option<String>,
}

/// A snippet function bound to the unit it was compiled in.
#[derive(Clone)]
pub struct ScriptCallable {
    runtime: ScriptRuntime,
    ast: Arc<AST>,
    fn_ptr: FnPtr,
}

impl ScriptCallable {
    pub(crate) fn new(runtime: ScriptRuntime, ast: Arc<AST>, fn_ptr: FnPtr) -> Self {
        Self {
            runtime,
            ast,
            fn_ptr,
        }
    }

    /// Name of the underlying function.
    pub fn name(&self) -> &str {
        self.fn_ptr.fn_name()
    }

    /// Closures have generated names that change on every compile.
    pub fn is_anonymous(&self) -> bool {
        self.fn_ptr.is_anonymous()
    }

    /// Call the function with a single argument.
    pub fn call(&self, arg: Dynamic) -> Result<Dynamic, ScriptError> {
        self.fn_ptr
            .call::<Dynamic>(self.runtime.engine(), &self.ast, (arg,))
            .map_err(|e| ScriptError::Runtime(e.to_string()))
    }

    /// Call the function with an invocation context.
    pub fn call_with_context(&self, ctx: &CommandContext) -> Result<Dynamic, ScriptError> {
        self.call(Dynamic::from(ctx.clone()))
    }
}

impl std::fmt::Debug for ScriptCallable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptCallable")
            .field("name", &self.name())
            .finish()
    }
}

/// A command ready to be added to the dispatcher.
#[derive(Debug, Clone)]
pub struct ScriptCommand {
    pub name: String,
    pub description: String,
    pub aliases: Vec<String>,
    pub owner_only: bool,
    pub hidden: bool,
    pub callable: ScriptCallable,
}

impl ScriptCommand {
    /// Run the command. Queued replies come first, then a non-empty string
    /// return value.
    pub fn invoke(&self, ctx: &CommandContext) -> Result<Vec<String>, ScriptError> {
        let value = self.callable.call_with_context(ctx)?;
        let mut replies = ctx.take_replies();
        if value.is_string() {
            if let Ok(text) = value.into_string() {
                if !text.is_empty() {
                    replies.push(text);
                }
            }
        }
        Ok(replies)
    }
}

/// A function paired with the event it should listen for.
#[derive(Debug, Clone)]
pub struct ScriptListener {
    pub callable: ScriptCallable,
    explicit_event: Option<String>,
}

impl ScriptListener {
    pub fn new(callable: ScriptCallable, event: Option<String>) -> Self {
        Self {
            callable,
            explicit_event: event,
        }
    }

    /// Name of the underlying function, the listener's key.
    pub fn name(&self) -> &str {
        self.callable.name()
    }

    /// Event to subscribe to: the explicit one, else the function name.
    pub fn event_name(&self) -> &str {
        self.explicit_event
            .as_deref()
            .unwrap_or_else(|| self.callable.name())
    }

    /// Deliver an event payload to the function.
    pub fn handle<E: Serialize>(&self, event: &E) -> Result<(), ScriptError> {
        let payload =
            rhai::serde::to_dynamic(event).map_err(|e| ScriptError::Payload(e.to_string()))?;
        self.callable.call(payload).map(|_| ())
    }
}

/// Shape of a compiled snippet's result.
#[derive(Debug, Clone)]
pub enum SnippetValue {
    Command(ScriptCommand),
    /// Explicit `listener(...)` declaration.
    Listener(ScriptListener),
    /// A bare function pointer.
    Callable(ScriptCallable),
    /// Anything else; carries the script type name.
    Other(String),
}
