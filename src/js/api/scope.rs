// Worker scope - the globals a worker script sees (`self`, `postMessage`, `onmessage`, intervals)

use crate::js::runtime::{self, GuestCallback};
use crate::js::worker::{
    period_from_millis, CallbackSlot, IntervalId, IntervalScheduler, Message, WorkerEndpoint,
};
use rquickjs::prelude::Opt;
use rquickjs::{Coerced, Ctx, Exception, Function, Object, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

const SCOPE_PRELUDE: &str = r#"
(function (native) {
    globalThis.self = globalThis;

    globalThis.postMessage = function postMessage(value, ...transfer) {
        native.post(value, transfer.length);
    };

    Object.defineProperty(globalThis, "onmessage", {
        get() {
            return native.getOnmessage();
        },
        set(handler) {
            native.setOnmessage(handler);
        },
        enumerable: true,
        configurable: true,
    });

    globalThis.addEventListener = function addEventListener(type, listener) {
        native.listen(type, listener);
    };
})(globalThis.__scope_native);
delete globalThis.__scope_native;
"#;

/// Worker-thread state behind the scope globals
///
/// Lives on the worker thread only. Holds guest callbacks, so
/// [`WorkerScope::release`] must run before the worker's runtime is dropped.
#[derive(Debug)]
pub struct WorkerScope {
    endpoint: WorkerEndpoint,
    on_message: RefCell<CallbackSlot<GuestCallback>>,
    intervals: RefCell<IntervalScheduler<GuestCallback>>,
    default_interval: Duration,
}

impl WorkerScope {
    pub fn new(endpoint: WorkerEndpoint, default_interval: Duration) -> Rc<Self> {
        Rc::new(Self {
            endpoint,
            on_message: RefCell::new(CallbackSlot::new()),
            intervals: RefCell::new(IntervalScheduler::new()),
            default_interval,
        })
    }

    pub fn endpoint(&self) -> &WorkerEndpoint {
        &self.endpoint
    }

    /// Ids of the intervals due at `now`; their schedule is advanced
    pub fn due_intervals(&self, now: Instant) -> Vec<IntervalId> {
        self.intervals.borrow_mut().due(now)
    }

    /// Callback of an interval that is still set
    pub fn interval_callback(&self, id: IntervalId) -> Option<GuestCallback> {
        self.intervals.borrow().callback(id).cloned()
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.borrow().len()
    }

    /// Take every message the owner sent
    ///
    /// Empty while no handler is registered; the messages stay queued.
    pub fn take_inbox(&self) -> Vec<Message> {
        let slot = self.on_message.borrow();
        self.endpoint.inbox().drain_for(&*slot)
    }

    /// The `onmessage` handler registered right now
    pub fn message_handler(&self) -> Option<GuestCallback> {
        self.on_message.borrow().get().cloned()
    }

    /// Put messages that found no handler back at the head of the inbox
    pub fn requeue(&self, messages: Vec<Message>) {
        self.endpoint.inbox().requeue_front(messages);
    }

    /// Drop the handler, every interval and undelivered messages
    pub fn release(&self) {
        self.on_message.borrow_mut().clear();
        self.intervals.borrow_mut().clear_all();
        let discarded = self.endpoint.inbox().discard();
        if discarded > 0 {
            tracing::debug!(
                worker = self.endpoint.label(),
                discarded,
                "Discarding undelivered messages"
            );
        }
    }

    fn set_handler<'js>(&self, ctx: &Ctx<'js>, value: Value<'js>, binding: &str) {
        let handler = runtime::callback_from_value(ctx, value, binding);
        self.on_message.borrow_mut().replace(handler);
    }
}

/// Install the worker globals, plus `setInterval`/`clearInterval`
pub fn install<'js>(ctx: &Ctx<'js>, scope: Rc<WorkerScope>) -> rquickjs::Result<()> {
    let native = Object::new(ctx.clone())?;

    let post_scope = scope.clone();
    native.set(
        "post",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, value: Value<'js>, transfer: Opt<u32>| -> rquickjs::Result<()> {
                if transfer.0.unwrap_or(0) > 0 {
                    tracing::warn!(
                        worker = post_scope.endpoint.label(),
                        "postMessage takes a single argument, ignoring the transfer list"
                    );
                }
                post_scope.endpoint.post(runtime::serialize(&ctx, value)?);
                Ok(())
            },
        )?,
    )?;

    let set_scope = scope.clone();
    native.set(
        "setOnmessage",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>, handler: Value<'js>| {
            set_scope.set_handler(&ctx, handler, "onmessage");
        })?,
    )?;

    let get_scope = scope.clone();
    native.set(
        "getOnmessage",
        Function::new(ctx.clone(), move |ctx: Ctx<'js>| {
            let handler = get_scope.on_message.borrow().get().cloned();
            runtime::callback_to_value(&ctx, handler)
        })?,
    )?;

    let listen_scope = scope.clone();
    native.set(
        "listen",
        Function::new(
            ctx.clone(),
            move |ctx: Ctx<'js>, event: Coerced<String>, listener: Value<'js>| {
                if event.0 == "message" {
                    listen_scope.set_handler(&ctx, listener, "addEventListener");
                } else {
                    tracing::warn!(
                        worker = listen_scope.endpoint.label(),
                        event = %event.0,
                        "Ignoring listener for unknown event"
                    );
                }
            },
        )?,
    )?;

    ctx.globals().set("__scope_native", native)?;
    ctx.eval::<(), _>(SCOPE_PRELUDE)?;

    let set_scope = scope.clone();
    let set_interval = Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, callback: Value<'js>, period: Opt<Value<'js>>| -> rquickjs::Result<IntervalId> {
            let Some(function) = callback.as_function() else {
                return Err(Exception::throw_type(&ctx, "setInterval: callback is not a function"));
            };
            let millis = period.0.and_then(|value| value.as_number());
            let period = period_from_millis(millis, set_scope.default_interval);
            let callback = rquickjs::Persistent::save(&ctx, function.clone());
            Ok(set_scope.intervals.borrow_mut().set(callback, period, Instant::now()))
        },
    )?
    .with_name("setInterval")?;
    ctx.globals().set("setInterval", set_interval)?;

    let clear_scope = scope;
    let clear_interval = Function::new(ctx.clone(), move |id: Opt<Value<'js>>| {
        let id = id.0.and_then(|value| value.as_number());
        let removed = id.and_then(|id| clear_scope.intervals.borrow_mut().clear(id as IntervalId));
        match removed {
            // dropped outside the scheduler borrow
            Some(callback) => drop(callback),
            None => tracing::warn!(
                worker = clear_scope.endpoint.label(),
                id = ?id,
                "clearInterval: no interval with this id is set"
            ),
        }
    })?
    .with_name("clearInterval")?;
    ctx.globals().set("clearInterval", clear_interval)?;

    Ok(())
}
