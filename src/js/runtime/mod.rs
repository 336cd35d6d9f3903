// Guest runtime - one QuickJS runtime and context per execution context (main or worker)

pub mod exception;
pub mod worker;

pub use exception::ScriptError;

use crate::js::api;
use crate::js::assets::AssetRoot;
use crate::js::config::{HostConfig, RuntimeConfig, WorkerConfig};
use crate::js::error::{JsRuntimeError, WorkerError};
use crate::js::worker::{self as workers, DrainStats, Message, WorkerId, WorkerRegistry};
use rquickjs::context::EvalOptions;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Object, Persistent, Runtime, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

/// A guest function kept alive across host calls
///
/// Bound to the runtime that created it; must be dropped before that runtime.
pub type GuestCallback = Persistent<Function<'static>>;

/// The owner's `onmessage` for one worker
///
/// Also holds the guest `Worker` object, so the object cannot be collected
/// (and the worker finalized) while a registered handler can still receive
/// replies. It is let go when the handler is cleared or the worker is reaped.
#[derive(Debug, Clone)]
pub struct OwnerHandler {
    pub callback: GuestCallback,
    _worker: Persistent<Object<'static>>,
}

impl OwnerHandler {
    pub fn new<'js>(ctx: &Ctx<'js>, callback: GuestCallback, worker: Object<'js>) -> Self {
        Self {
            callback,
            _worker: Persistent::save(ctx, worker),
        }
    }
}

/// Everything an execution context needs to boot; cloned into every worker thread
#[derive(Debug, Clone, Default)]
pub struct ContextSettings {
    pub assets: AssetRoot,
    pub runtime: RuntimeConfig,
    pub workers: WorkerConfig,
}

impl ContextSettings {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            assets: AssetRoot::new(config.assets_root()),
            runtime: config.runtime.clone(),
            workers: config.workers.clone(),
        }
    }
}

/// Host-side state of one execution context, shared with its native bindings
#[derive(Debug)]
pub struct ContextState {
    label: String,
    settings: ContextSettings,
    workers: RefCell<WorkerRegistry<OwnerHandler>>,
    sources: RefCell<HashMap<String, Rc<str>>>,
}

impl ContextState {
    fn new(label: String, settings: ContextSettings) -> Self {
        let registry = WorkerRegistry::with_options(label.clone(), settings.workers.spawn_options());
        Self {
            label,
            settings,
            workers: RefCell::new(registry),
            sources: RefCell::new(HashMap::new()),
        }
    }

    /// Label of the context, e.g. `main` or `main/2/1`
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    /// Workers owned by this context
    pub fn workers(&self) -> &RefCell<WorkerRegistry<OwnerHandler>> {
        &self.workers
    }

    /// Start a worker running the guest script `script`
    ///
    /// The script is resolved against the asset root and must exist.
    pub fn spawn_worker(&self, script: &str) -> Result<WorkerId, WorkerError> {
        let path = self.settings.assets.resolve(script);
        let settings = self.settings.clone();
        let script = script.to_string();
        self.workers
            .borrow_mut()
            .spawn(&path, move |endpoint| worker::run(endpoint, settings, script))
    }

    fn remember_source(&self, name: &str, source: &str) {
        self.sources
            .borrow_mut()
            .insert(name.to_string(), Rc::from(source));
    }

    /// Log a guest error with an excerpt of the script it came from
    pub fn report(&self, error: &ScriptError) {
        let source = error
            .file
            .as_deref()
            .and_then(|file| self.sources.borrow().get(file).cloned());
        error.report(&self.label, source.as_deref());
    }
}

/// Serialize a guest value into a message with `JSON.stringify`
///
/// Values with no JSON form (`undefined`, functions) become `null`.
pub fn serialize<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<Message> {
    let text = match ctx.json_stringify(value)? {
        Some(text) => text.to_string()?,
        None => "null".to_string(),
    };
    Ok(Message::from_serialized(text))
}

/// Keep a guest function for later, or `None` for `null`/`undefined`
///
/// Any other value is ignored with a warning.
pub fn callback_from_value<'js>(ctx: &Ctx<'js>, value: Value<'js>, binding: &str) -> Option<GuestCallback> {
    if let Some(function) = value.as_function() {
        return Some(Persistent::save(ctx, function.clone()));
    }
    if !(value.is_null() || value.is_undefined()) {
        tracing::warn!(binding, kind = value.type_name(), "Ignoring handler that is not a function");
    }
    None
}

/// Restore a kept function as a guest value, `null` when there is none
pub fn callback_to_value<'js>(ctx: &Ctx<'js>, callback: Option<GuestCallback>) -> rquickjs::Result<Value<'js>> {
    match callback {
        Some(callback) => Ok(callback.restore(ctx)?.into_value()),
        None => Ok(Value::new_null(ctx.clone())),
    }
}

fn script_options(name: &str) -> EvalOptions {
    let mut options = EvalOptions::default();
    options.strict = false;
    options.filename = Some(name.to_string());
    options
}

/// A guest runtime with the worker bindings installed
///
/// Not `Send`: it is created, used and dropped on one thread. Dropping it
/// terminates and joins every worker it owns.
pub struct GuestRuntime {
    state: Rc<ContextState>,
    context: Context,
    runtime: Runtime,
}

impl GuestRuntime {
    /// Bootstrap a runtime labelled `label`
    ///
    /// Applies the configured limits and installs `console` and `Worker`.
    pub fn new(label: impl Into<String>, settings: ContextSettings) -> Result<Self, JsRuntimeError> {
        let runtime = Runtime::new().map_err(|e| JsRuntimeError::Init(e.to_string()))?;
        runtime.set_memory_limit(settings.runtime.memory_limit);
        runtime.set_max_stack_size(settings.runtime.max_stack_size);
        if let Some(threshold) = settings.runtime.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }

        let context = Context::full(&runtime).map_err(|e| JsRuntimeError::Init(e.to_string()))?;
        let state = Rc::new(ContextState::new(label.into(), settings));

        context
            .with(|ctx| api::install(&ctx, state.clone()))
            .map_err(|e| JsRuntimeError::Init(format!("failed to install bindings: {}", e)))?;

        tracing::debug!(context = state.label(), "Guest runtime ready");

        Ok(Self {
            state,
            context,
            runtime,
        })
    }

    pub fn label(&self) -> &str {
        self.state.label()
    }

    pub fn state(&self) -> &Rc<ContextState> {
        &self.state
    }

    /// Run `f` inside the context. Must not be nested.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(Ctx) -> R,
    {
        self.context.with(f)
    }

    /// Load and run a script from the asset root
    pub fn run_script(&self, script: impl AsRef<Path>) -> Result<(), JsRuntimeError> {
        let script = script.as_ref();
        let assets = &self.state.settings().assets;
        let source = assets.read(script).map_err(|source| JsRuntimeError::Load {
            path: assets.resolve(script),
            source,
        })?;
        self.eval_source(&script.display().to_string(), &source)
    }

    /// Run `source` as a script named `name`
    ///
    /// A guest exception is logged and returned.
    pub fn eval_source(&self, name: &str, source: &str) -> Result<(), JsRuntimeError> {
        self.state.remember_source(name, source);
        self.context
            .with(|ctx| {
                ctx.eval_with_options::<(), _>(source, script_options(name))
                    .catch(&ctx)
                    .map_err(ScriptError::from_caught)
            })
            .map_err(|error| self.fail(error))
    }

    /// Evaluate an expression and return its JSON form
    pub fn eval_json(&self, expression: &str) -> Result<serde_json::Value, JsRuntimeError> {
        let text = self.context.with(|ctx| {
            let value: Value = ctx
                .eval_with_options(expression, script_options("<eval>"))
                .catch(&ctx)
                .map_err(ScriptError::from_caught)?;
            serialize(&ctx, value)
                .catch(&ctx)
                .map_err(ScriptError::from_caught)
        });
        let message = text.map_err(|error| self.fail(error))?;
        message
            .to_json()
            .map_err(|e| JsRuntimeError::Serialization(e.to_string()))
    }

    fn fail(&self, error: ScriptError) -> JsRuntimeError {
        self.state.report(&error);
        JsRuntimeError::Script(error)
    }

    /// Call a kept function with no arguments
    ///
    /// Exceptions are logged and cleared. Returns whether the call completed.
    pub fn invoke(&self, callback: &GuestCallback) -> bool {
        self.context.with(|ctx| {
            let result = callback
                .clone()
                .restore(&ctx)
                .and_then(|function| function.call::<_, ()>(()));
            self.contain(&ctx, result)
        })
    }

    /// Hand `message` to `handler` as `{ data }`
    ///
    /// Exceptions are logged and cleared. Returns whether the call completed.
    pub fn deliver(&self, handler: &GuestCallback, message: &Message) -> bool {
        self.context.with(|ctx| {
            let result = (|| {
                let handler = handler.clone().restore(&ctx)?;
                let event = Object::new(ctx.clone())?;
                event.set("data", ctx.json_parse(message.as_str())?)?;
                handler.call::<_, ()>((event,))
            })();
            self.contain(&ctx, result)
        })
    }

    fn contain<'js>(&self, ctx: &Ctx<'js>, result: rquickjs::Result<()>) -> bool {
        match result.catch(ctx) {
            Ok(()) => true,
            Err(caught) => {
                self.state.report(&ScriptError::from_caught(caught));
                false
            }
        }
    }

    /// Run queued promise reactions and finalization callbacks
    ///
    /// Returns how many jobs ran.
    pub fn run_pending_jobs(&self) -> usize {
        let mut executed = 0;
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => executed += 1,
                Ok(false) => break,
                Err(job) => {
                    executed += 1;
                    job.0.with(|ctx| {
                        let caught = CaughtError::catch(&ctx, Err::<(), _>(rquickjs::Error::Exception));
                        if let Err(caught) = caught {
                            self.state.report(&ScriptError::from_caught(caught));
                        }
                    });
                }
            }
        }
        executed
    }

    /// Force a GC cycle; collected `Worker` objects queue their release as a job
    pub fn collect_garbage(&self) {
        self.runtime.run_gc();
    }

    /// Deliver pending messages from every worker this context owns
    pub fn drain_workers(&self) -> DrainStats {
        workers::drain_workers(self.state.workers(), |_, handler, message| {
            self.deliver(&handler.callback, &message);
        })
    }

    /// Number of workers owned by this context
    pub fn worker_count(&self) -> usize {
        self.state.workers().borrow().len()
    }

    /// Terminate and join every owned worker and drop their handlers
    ///
    /// Also run on drop. Idempotent.
    pub fn shutdown(&self) {
        match self.state.workers().try_borrow_mut() {
            Ok(mut workers) => workers.shutdown(),
            Err(_) => tracing::error!(context = self.label(), "Worker registry busy during shutdown"),
        }
    }
}

impl Drop for GuestRuntime {
    fn drop(&mut self) {
        self.shutdown();
        tracing::debug!(context = self.label(), "Guest runtime dropped");
    }
}
