//! Compiling snippet source into a single artifact.

use std::path::PathBuf;
use std::sync::Arc;

use rhai::module_resolvers::{DummyModuleResolver, FileModuleResolver};
use rhai::{AST, Array, Dynamic, Engine, FnPtr, Map, Scope};

use crate::artifact::{
    CommandSpec, ListenerSpec, ScriptCallable, ScriptCommand, ScriptListener, SnippetValue,
};
use crate::capabilities::{self, Capabilities};
use crate::error::ScriptError;

/// Shared engine every compiled artifact runs on.
#[derive(Clone)]
pub struct ScriptRuntime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    engine: Engine,
    caps: Capabilities,
    max_operations: Option<u64>,
}

impl ScriptRuntime {
    pub fn new(caps: Capabilities, max_operations: Option<u64>) -> Self {
        let mut engine = build_engine(&caps, max_operations);
        // Imports are embedded at compile time; nothing is read from disk afterwards.
        engine.set_module_resolver(DummyModuleResolver::new());
        Self {
            inner: Arc::new(RuntimeInner {
                engine,
                caps,
                max_operations,
            }),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.caps
    }

    /// Evaluate ad-hoc code with extra variables in scope.
    pub fn eval_with_bindings(
        &self,
        code: &str,
        bindings: Vec<(String, Dynamic)>,
    ) -> Result<Dynamic, ScriptError> {
        let mut scope = Scope::new();
        for (name, value) in bindings {
            scope.push_dynamic(name, value);
        }
        self.engine()
            .eval_with_scope::<Dynamic>(&mut scope, code)
            .map_err(|e| ScriptError::Runtime(e.to_string()))
    }
}

fn build_engine(caps: &Capabilities, max_operations: Option<u64>) -> Engine {
    let mut engine = Engine::new();
    capabilities::register(&mut engine, caps);
    if let Some(limit) = max_operations {
        engine.set_max_operations(limit);
    }
    engine
}

/// Turns snippet source into a [`CompiledSnippet`].
#[derive(Clone)]
pub struct SnippetCompiler {
    runtime: ScriptRuntime,
    module_dir: Option<PathBuf>,
}

impl SnippetCompiler {
    /// `module_dir` is where `import` statements resolve while compiling.
    pub fn new(runtime: ScriptRuntime, module_dir: Option<PathBuf>) -> Self {
        Self {
            runtime,
            module_dir,
        }
    }

    pub fn runtime(&self) -> &ScriptRuntime {
        &self.runtime
    }

    /// Compile a snippet body and run its top-level statements.
    ///
    /// Fails with [`ScriptError::Compile`] if parsing, an import, or the
    /// top-level code fails, and with [`ScriptError::EmptyResult`] if the
    /// returned value is falsy. Installs nothing.
    pub fn compile(&self, source: &str) -> Result<CompiledSnippet, ScriptError> {
        let ast = {
            // Only this engine can see the module directory, and only for
            // the duration of this call.
            let mut engine = build_engine(
                self.runtime.capabilities(),
                self.runtime.inner.max_operations,
            );
            match &self.module_dir {
                Some(dir) => engine.set_module_resolver(FileModuleResolver::new_with_path(dir)),
                None => engine.set_module_resolver(DummyModuleResolver::new()),
            };
            engine
                .compile_into_self_contained(&Scope::new(), source)
                .map_err(|e| ScriptError::Compile(e.to_string()))?
        };

        let value = self
            .runtime
            .engine()
            .eval_ast_with_scope::<Dynamic>(&mut Scope::new(), &ast)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;

        if is_falsy(&value) {
            return Err(ScriptError::EmptyResult);
        }

        tracing::trace!(value_type = value.type_name(), "Compiled snippet");

        Ok(CompiledSnippet {
            runtime: self.runtime.clone(),
            ast: Arc::new(ast),
            value,
        })
    }
}

/// The value a snippet returned, together with the unit it came from.
#[derive(Clone)]
pub struct CompiledSnippet {
    runtime: ScriptRuntime,
    ast: Arc<AST>,
    value: Dynamic,
}

impl CompiledSnippet {
    /// Script type name of the returned value.
    pub fn type_name(&self) -> &str {
        self.value.type_name()
    }

    /// Inspect the returned value and bind it to this unit.
    pub fn probe(&self) -> SnippetValue {
        if let Some(spec) = self.value.clone().try_cast::<CommandSpec>() {
            return SnippetValue::Command(ScriptCommand {
                name: spec.name,
                description: spec.description,
                aliases: spec.aliases,
                owner_only: spec.owner_only,
                hidden: spec.hidden,
                callable: self.bind(spec.fn_ptr),
            });
        }
        if let Some(spec) = self.value.clone().try_cast::<ListenerSpec>() {
            let callable = self.bind(spec.fn_ptr);
            return SnippetValue::Listener(ScriptListener::new(callable, spec.event));
        }
        if let Some(fn_ptr) = self.value.clone().try_cast::<FnPtr>() {
            return SnippetValue::Callable(self.bind(fn_ptr));
        }
        SnippetValue::Other(self.type_name().to_string())
    }

    fn bind(&self, fn_ptr: FnPtr) -> ScriptCallable {
        ScriptCallable::new(self.runtime.clone(), self.ast.clone(), fn_ptr)
    }
}

fn is_falsy(value: &Dynamic) -> bool {
    if value.is_unit() {
        return true;
    }
    if let Ok(flag) = value.as_bool() {
        return !flag;
    }
    if let Ok(number) = value.as_int() {
        return number == 0;
    }
    if let Ok(number) = value.as_float() {
        return number == 0.0;
    }
    if value.is_string() {
        return value
            .clone()
            .into_immutable_string()
            .is_ok_and(|text| text.is_empty());
    }
    if value.is::<Array>() {
        return value.clone().into_array().is_ok_and(|array| array.is_empty());
    }
    if value.is::<Map>() {
        return value.clone().try_cast::<Map>().is_some_and(|map| map.is_empty());
    }
    false
}
