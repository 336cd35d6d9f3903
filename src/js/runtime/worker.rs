// Worker thread routine - boots a guest runtime for the worker and runs its loop

use super::{ContextSettings, GuestRuntime};
use crate::js::api::{self, WorkerScope};
use crate::js::error::JsRuntimeError;
use crate::js::worker::WorkerEndpoint;
use std::iter;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

/// What one loop iteration did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Iteration {
    pub intervals: usize,
    pub messages: usize,
    pub child_messages: usize,
    pub jobs: usize,
}

/// Body of a worker thread
///
/// Runs until the owner terminates the worker. Finishing the script does not
/// end the worker. On the way out every child worker is terminated and
/// joined, then every guest callback is dropped before the runtime.
pub fn run(endpoint: WorkerEndpoint, settings: ContextSettings, script: String) {
    let label = endpoint.label().to_string();
    let idle = settings.workers.idle_sleep();
    let default_interval = settings.workers.default_interval();

    let guest = match GuestRuntime::new(label.clone(), settings) {
        Ok(guest) => guest,
        Err(e) => {
            tracing::error!(worker = %label, error = %e, "Failed to start worker runtime");
            return;
        }
    };

    let scope = WorkerScope::new(endpoint.clone(), default_interval);
    match guest.with(|ctx| api::scope::install(&ctx, scope.clone())) {
        Ok(()) => {
            // a throwing script has already been reported; the worker keeps running
            if let Err(e) = guest.run_script(&script) {
                if !matches!(e, JsRuntimeError::Script(_)) {
                    tracing::error!(worker = %label, script = %script, error = %e, "Could not load worker script");
                }
            }
            tracing::debug!(worker = %label, script = %script, "Worker script loaded");

            while !endpoint.is_terminated() {
                step(&guest, &scope, Instant::now());
                pause(idle);
            }
        }
        Err(e) => {
            tracing::error!(worker = %label, error = %e, "Failed to install worker globals");
        }
    }

    guest.shutdown();
    scope.release();
    drop(guest);
    tracing::debug!(worker = %label, "Worker stopped");
}

/// One pass of the worker loop
///
/// Fires due intervals, delivers the owner's messages, drains this worker's
/// own children and runs pending jobs. Termination is only checked between
/// passes, never in the middle of one.
pub fn step(guest: &GuestRuntime, scope: &Rc<WorkerScope>, now: Instant) -> Iteration {
    let mut iteration = Iteration::default();

    for id in scope.due_intervals(now) {
        // a callback may have cleared a later timer
        if let Some(callback) = scope.interval_callback(id) {
            guest.invoke(&callback);
            iteration.intervals += 1;
        }
    }

    // the handler may replace or clear itself between messages
    let mut inbox = scope.take_inbox().into_iter();
    while let Some(message) = inbox.next() {
        let Some(handler) = scope.message_handler() else {
            scope.requeue(iter::once(message).chain(inbox).collect());
            break;
        };
        guest.deliver(&handler, &message);
        iteration.messages += 1;
    }

    iteration.child_messages = guest.drain_workers().delivered;
    iteration.jobs = guest.run_pending_jobs();
    iteration
}

fn pause(idle: Duration) {
    if idle.is_zero() {
        thread::yield_now();
    } else {
        thread::sleep(idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::js::worker::{Message, WorkerId, WorkerPort};
    use serde_json::json;
    use std::sync::Arc;

    fn worker_guest(source: &str) -> (GuestRuntime, Rc<WorkerScope>, Arc<WorkerPort>) {
        let port = WorkerPort::new(WorkerId(1), "main/1");
        let endpoint = WorkerEndpoint::new(port.clone());
        let guest = GuestRuntime::new("main/1", ContextSettings::default()).unwrap();
        let scope = WorkerScope::new(endpoint, Duration::from_millis(16));
        guest.with(|ctx| api::scope::install(&ctx, scope.clone())).unwrap();
        guest.eval_source("worker.js", source).unwrap();
        (guest, scope, port)
    }

    #[test]
    fn step_replies_to_ping() {
        let (guest, scope, port) = worker_guest(
            "onmessage = (e) => { if (e.data.cmd === 'ping') postMessage({ cmd: 'pong', n: e.data.n + 1 }); };",
        );
        port.to_worker()
            .enqueue(Message::from_json(&json!({ "cmd": "ping", "n": 1 })));

        let iteration = step(&guest, &scope, Instant::now());
        assert_eq!(iteration.messages, 1);

        let replies = port.to_owner().drain_all();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].to_json().unwrap(), json!({ "cmd": "pong", "n": 2 }));
        scope.release();
    }

    #[test]
    fn throwing_handler_does_not_stop_later_messages() {
        let (guest, scope, port) = worker_guest(
            "onmessage = (e) => { if (e.data === 'bad') throw new Error('bad message'); postMessage(e.data); };",
        );
        for data in ["a", "bad", "b"] {
            port.to_worker().enqueue(Message::from_json(&json!(data)));
        }

        step(&guest, &scope, Instant::now());
        let replies: Vec<_> = port
            .to_owner()
            .drain_all()
            .iter()
            .map(|message| message.to_json().unwrap())
            .collect();
        assert_eq!(replies, vec![json!("a"), json!("b")]);
        scope.release();
    }

    #[test]
    fn intervals_fire_at_most_once_per_step() {
        let (guest, scope, _port) = worker_guest("var ticks = 0; setInterval(() => { ticks++; }, 10);");
        let start = Instant::now();

        let late = start + Duration::from_millis(100);
        assert_eq!(step(&guest, &scope, late).intervals, 1);
        assert_eq!(step(&guest, &scope, late).intervals, 0);
        assert_eq!(guest.eval_json("ticks").unwrap(), json!(1));
        scope.release();
    }

    #[test]
    fn interval_cleared_by_earlier_callback_does_not_fire() {
        let (guest, scope, _port) = worker_guest(
            "var fired = []; var b; \
             setInterval(() => { fired.push('a'); clearInterval(b); }, 10); \
             b = setInterval(() => { fired.push('b'); }, 10);",
        );
        let later = Instant::now() + Duration::from_millis(50);
        assert_eq!(step(&guest, &scope, later).intervals, 1);
        assert_eq!(guest.eval_json("fired").unwrap(), json!(["a"]));
        scope.release();
    }

    #[test]
    fn self_post_during_dispatch_is_delivered_next_step() {
        let (guest, scope, port) = worker_guest(
            "var seen = []; onmessage = (e) => { seen.push(e.data); if (e.data < 3) postMessage(e.data); };",
        );
        port.to_worker().enqueue(Message::from_json(&json!(1)));
        step(&guest, &scope, Instant::now());
        // loop the reply back into the inbox, as an owner echo would
        for message in port.to_owner().drain_all() {
            port.to_worker().enqueue(Message::from_serialized(message.as_str()));
        }
        step(&guest, &scope, Instant::now());
        assert_eq!(guest.eval_json("seen").unwrap(), json!([1, 1]));
        scope.release();
    }

    #[test]
    fn handler_replaced_mid_batch_takes_the_rest() {
        let (guest, scope, port) = worker_guest(
            "var first = [], second = []; \
             onmessage = (e) => { first.push(e.data); onmessage = (e) => second.push(e.data); };",
        );
        for n in 1..=3 {
            port.to_worker().enqueue(Message::from_json(&json!(n)));
        }

        assert_eq!(step(&guest, &scope, Instant::now()).messages, 3);
        assert_eq!(guest.eval_json("[first, second]").unwrap(), json!([[1], [2, 3]]));
        scope.release();
    }

    #[test]
    fn handler_cleared_mid_batch_leaves_the_rest_queued() {
        let (guest, scope, port) = worker_guest(
            "var seen = []; onmessage = (e) => { seen.push(e.data); onmessage = null; };",
        );
        for n in 1..=3 {
            port.to_worker().enqueue(Message::from_json(&json!(n)));
        }

        assert_eq!(step(&guest, &scope, Instant::now()).messages, 1);
        assert_eq!(port.to_worker().len(), 2);

        guest.eval_source("later.js", "onmessage = (e) => seen.push(e.data);").unwrap();
        step(&guest, &scope, Instant::now());
        assert_eq!(guest.eval_json("seen").unwrap(), json!([1, 2, 3]));
        scope.release();
    }

    #[test]
    fn idle_step_reports_nothing() {
        let (guest, scope, _port) = worker_guest("");
        assert_eq!(step(&guest, &scope, Instant::now()), Iteration::default());
        scope.release();
    }
}
