// Worker binding - the owner-side `Worker` class, backed by the context's worker registry

use crate::js::runtime::{self, ContextState, OwnerHandler};
use crate::js::worker::WorkerId;
use rquickjs::prelude::Opt;
use rquickjs::{Coerced, Ctx, Exception, Function, Object, Value};
use std::rc::Rc;

/// Defines `Worker` on top of the `native` bridge object, then drops the bridge
///
/// A `FinalizationRegistry` (when the engine has one) releases the native
/// worker once the guest object is collected. Handlers are registered along
/// with `this`, which keeps the object reachable while it can get replies.
const WORKER_PRELUDE: &str = r#"
(function (native) {
    const finalizer = typeof FinalizationRegistry === "function"
        ? new FinalizationRegistry((id) => native.release(id))
        : null;

    class Worker {
        #id;

        constructor(scriptPath) {
            this.#id = native.spawn(scriptPath, arguments.length);
            if (finalizer) {
                finalizer.register(this, this.#id);
            }
        }

        get onmessage() {
            return native.getOnmessage(this.#id);
        }

        set onmessage(handler) {
            native.setOnmessage(this.#id, handler, this);
        }

        addEventListener(type, listener) {
            native.listen(this.#id, type, listener, this);
        }

        postMessage(value, ...transfer) {
            native.post(this.#id, value, transfer.length);
        }

        terminate() {
            native.terminate(this.#id);
        }
    }

    globalThis.Worker = Worker;
})(globalThis.__worker_native);
delete globalThis.__worker_native;
"#;

fn dropped(state: &ContextState, id: u32, error: impl std::fmt::Display) {
    tracing::debug!(context = state.label(), worker = id, error = %error, "Ignoring call on worker");
}

/// Install the `Worker` class into a context
pub fn install<'js>(ctx: &Ctx<'js>, state: Rc<ContextState>) -> rquickjs::Result<()> {
    let native = Object::new(ctx.clone())?;

    let spawn_state = state.clone();
    native.set(
        "spawn",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, script: Coerced<String>, argc: Opt<u32>| -> rquickjs::Result<u32> {
                let argc = argc.0.unwrap_or(1);
                if argc == 0 {
                    return Err(Exception::throw_type(
                        &ctx,
                        "Worker constructor: At least 1 argument required, but only 0 passed",
                    ));
                }
                if argc > 1 {
                    tracing::warn!(
                        context = spawn_state.label(),
                        "Worker constructor takes a single script path, ignoring extra arguments"
                    );
                }
                match spawn_state.spawn_worker(&script.0) {
                    Ok(id) => Ok(id.0),
                    Err(e) => Err(Exception::throw_message(&ctx, &e.to_string())),
                }
            },
        )?,
    )?;

    let post_state = state.clone();
    native.set(
        "post",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, id: u32, value: Value<'js>, transfer: Opt<u32>| -> rquickjs::Result<()> {
                if transfer.0.unwrap_or(0) > 0 {
                    tracing::warn!(
                        context = post_state.label(),
                        "postMessage takes a single argument, ignoring the transfer list"
                    );
                }
                let message = runtime::serialize(&ctx, value)?;
                if let Err(e) = post_state.workers().borrow().post(WorkerId(id), message) {
                    dropped(&post_state, id, e);
                }
                Ok(())
            },
        )?,
    )?;

    let set_state = state.clone();
    native.set(
        "setOnmessage",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, id: u32, handler: Value<'js>, owner: Object<'js>| {
                set_handler(&ctx, &set_state, id, handler, owner, "Worker.onmessage");
            },
        )?,
    )?;

    let listen_state = state.clone();
    native.set(
        "listen",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, id: u32, event: Coerced<String>, listener: Value<'js>, owner: Object<'js>| {
                if event.0 == "message" {
                    set_handler(&ctx, &listen_state, id, listener, owner, "Worker.addEventListener");
                } else {
                    tracing::warn!(
                        context = listen_state.label(),
                        event = %event.0,
                        "Ignoring listener for unknown event"
                    );
                }
            },
        )?,
    )?;

    let get_state = state.clone();
    native.set(
        "getOnmessage",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, id: u32| {
            let handler = get_state
                .workers()
                .borrow()
                .handler(WorkerId(id))
                .map(|handler| handler.callback.clone());
            runtime::callback_to_value(&ctx, handler)
        })?,
    )?;

    let terminate_state = state.clone();
    native.set(
        "terminate",
        Function::new(ctx.clone(), move |id: u32| {
            if let Err(e) = terminate_state.workers().borrow().terminate(WorkerId(id)) {
                dropped(&terminate_state, id, e);
            }
        })?,
    )?;

    let release_state = state;
    native.set(
        "release",
        Function::new(ctx.clone(), move |id: u32| {
            let mut workers = release_state.workers().borrow_mut();
            // reaped workers are already gone
            if workers.state(WorkerId(id)).is_some() {
                workers.release(WorkerId(id));
            }
        })?,
    )?;

    ctx.globals().set("__worker_native", native)?;
    ctx.eval::<(), _>(WORKER_PRELUDE)
}

fn set_handler<'js>(
    ctx: &Ctx<'js>,
    state: &ContextState,
    id: u32,
    value: Value<'js>,
    owner: Object<'js>,
    binding: &str,
) {
    let handler = runtime::callback_from_value(ctx, value, binding)
        .map(|callback| OwnerHandler::new(ctx, callback, owner));
    let previous = state.workers().borrow_mut().set_handler(WorkerId(id), handler);
    if let Err(e) = previous {
        dropped(state, id, e);
    }
}
