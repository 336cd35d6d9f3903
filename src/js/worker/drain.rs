// Host drain integration - flush owner-bound queues into the owner's callbacks

use super::port::WorkerId;
use super::queue::Message;
use super::registry::WorkerRegistry;
use std::cell::RefCell;
use std::iter;

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Messages handed to owner callbacks
    pub delivered: usize,
    /// Exited workers joined and removed from the registry
    pub reaped: usize,
}

/// Deliver every pending worker→owner message of `registry` to its handler
///
/// Runs synchronously on the owner's thread. The registry is not borrowed
/// while `dispatch` runs, so a handler may spawn, post to, terminate or
/// release workers of this same registry. The handler is looked up before
/// each message: one replaced mid-batch gets the rest of the batch, and when
/// it is cleared the rest goes back to the queue for the next handler. Must
/// be called every tick: there is no back-pressure, undrained messages
/// simply accumulate.
pub fn drain_workers<H, F>(registry: &RefCell<WorkerRegistry<H>>, mut dispatch: F) -> DrainStats
where
    H: Clone,
    F: FnMut(WorkerId, &H, Message),
{
    let inbound = registry.borrow().collect_inbound();

    let mut stats = DrainStats::default();
    for batch in inbound {
        let mut messages = batch.messages.into_iter();
        while let Some(message) = messages.next() {
            let handler = registry.borrow().handler(batch.worker).cloned();
            let Some(handler) = handler else {
                let rest: Vec<_> = iter::once(message).chain(messages).collect();
                let kept = rest.len();
                if !registry.borrow().requeue(batch.worker, rest) {
                    tracing::debug!(worker = %batch.worker, dropped = kept, "Dropping messages of released worker");
                }
                break;
            };
            dispatch(batch.worker, &handler, message);
            stats.delivered += 1;
        }
    }

    stats.reaped = registry.borrow_mut().reap();
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::js::worker::port::{WorkerEndpoint, WorkerState};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::rc::Rc;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::NamedTempFile;

    type Received = Rc<RefCell<Vec<(WorkerId, Value)>>>;

    fn pump<H: Clone>(
        registry: &RefCell<WorkerRegistry<H>>,
        mut dispatch: impl FnMut(WorkerId, &H, Message),
        mut done: impl FnMut() -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for workers");
            drain_workers(registry, &mut dispatch);
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Replies `pong` with `n + 1` to every `ping`
    fn echo_worker(endpoint: WorkerEndpoint) {
        while !endpoint.is_terminated() {
            for message in endpoint.inbox().drain_all() {
                let request = message.to_json().unwrap();
                if request["cmd"] == "ping" {
                    let n = request["n"].as_i64().unwrap();
                    endpoint.post(Message::from_json(&json!({ "cmd": "pong", "n": n + 1 })));
                }
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn recorder(received: &Received) -> impl FnMut(WorkerId, &(), Message) + '_ {
        move |id, _, message| {
            let event = json!({ "data": message.to_json().unwrap() });
            received.borrow_mut().push((id, event));
        }
    }

    #[test]
    fn ping_pong_is_delivered_exactly_once() {
        let script = NamedTempFile::new().unwrap();
        let registry = RefCell::new(WorkerRegistry::new("main"));
        let id = registry.borrow_mut().spawn(script.path(), echo_worker).unwrap();
        registry.borrow_mut().set_handler(id, Some(())).unwrap();

        registry
            .borrow()
            .post(id, Message::from_json(&json!({ "cmd": "ping", "n": 1 })))
            .unwrap();

        let received: Received = Rc::default();
        pump(&registry, recorder(&received), || !received.borrow().is_empty());

        // further drains deliver nothing new
        thread::sleep(Duration::from_millis(20));
        let stats = drain_workers(&registry, recorder(&received));
        assert_eq!(stats.delivered, 0);

        let received = received.borrow();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], (id, json!({ "data": { "cmd": "pong", "n": 2 } })));
    }

    #[test]
    fn workers_do_not_see_each_others_messages() {
        let script = NamedTempFile::new().unwrap();
        let registry = RefCell::new(WorkerRegistry::new("main"));
        let ids: Vec<_> = (0..4)
            .map(|_| {
                let id = registry.borrow_mut().spawn(script.path(), echo_worker).unwrap();
                registry.borrow_mut().set_handler(id, Some(())).unwrap();
                id
            })
            .collect();

        for (n, id) in ids.iter().enumerate() {
            let ping = json!({ "cmd": "ping", "n": (n as i64) * 100 });
            registry.borrow().post(*id, Message::from_json(&ping)).unwrap();
        }

        let received: Received = Rc::default();
        pump(&registry, recorder(&received), || received.borrow().len() == ids.len());

        for (id, event) in received.borrow().iter() {
            let n = ids.iter().position(|candidate| candidate == id).unwrap() as i64;
            assert_eq!(event["data"]["n"], json!(n * 100 + 1));
        }
    }

    #[test]
    fn handler_may_touch_registry_while_dispatching() {
        let script = NamedTempFile::new().unwrap();
        let registry = RefCell::new(WorkerRegistry::new("main"));
        let id = registry.borrow_mut().spawn(script.path(), echo_worker).unwrap();
        registry.borrow_mut().set_handler(id, Some(())).unwrap();
        registry
            .borrow()
            .post(id, Message::from_json(&json!({ "cmd": "ping", "n": 1 })))
            .unwrap();

        let replies = Rc::new(RefCell::new(0));
        pump(
            &registry,
            |id, _, _| {
                *replies.borrow_mut() += 1;
                registry.borrow().terminate(id).unwrap();
            },
            || *replies.borrow() == 1,
        );

        pump(&registry, |_, _, _| {}, || registry.borrow().is_empty());
    }

    /// Posts 1, 2, 3 as soon as it starts
    fn counting_worker(endpoint: WorkerEndpoint) {
        for n in 1..=3 {
            endpoint.post(Message::from_json(&json!(n)));
        }
        while !endpoint.is_terminated() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn wait_for_queued(registry: &RefCell<WorkerRegistry<&'static str>>, id: WorkerId, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while registry.borrow().pending(id) < count {
            assert!(Instant::now() < deadline, "timed out waiting for messages");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn handler_replaced_mid_batch_gets_the_rest() {
        let script = NamedTempFile::new().unwrap();
        let registry = RefCell::new(WorkerRegistry::new("main"));
        let id = registry.borrow_mut().spawn(script.path(), counting_worker).unwrap();
        registry.borrow_mut().set_handler(id, Some("first")).unwrap();
        wait_for_queued(&registry, id, 3);

        let seen = RefCell::new(Vec::new());
        let stats = drain_workers(&registry, |id, handler, message| {
            seen.borrow_mut().push((*handler, message.to_json().unwrap()));
            if *handler == "first" {
                registry.borrow_mut().set_handler(id, Some("second")).unwrap();
            }
        });

        assert_eq!(stats.delivered, 3);
        assert_eq!(
            *seen.borrow(),
            vec![("first", json!(1)), ("second", json!(2)), ("second", json!(3))]
        );
    }

    #[test]
    fn handler_cleared_mid_batch_keeps_the_rest_queued() {
        let script = NamedTempFile::new().unwrap();
        let registry = RefCell::new(WorkerRegistry::new("main"));
        let id = registry.borrow_mut().spawn(script.path(), counting_worker).unwrap();
        registry.borrow_mut().set_handler(id, Some("first")).unwrap();
        wait_for_queued(&registry, id, 3);

        let stats = drain_workers(&registry, |id, _, _| {
            registry.borrow_mut().set_handler(id, None).unwrap();
        });
        assert_eq!(stats.delivered, 1);
        assert_eq!(registry.borrow().pending(id), 2);

        registry.borrow_mut().set_handler(id, Some("later")).unwrap();
        let seen = RefCell::new(Vec::new());
        drain_workers(&registry, |_, _, message| seen.borrow_mut().push(message.to_json().unwrap()));
        assert_eq!(*seen.borrow(), vec![json!(2), json!(3)]);
    }

    #[test]
    fn terminated_workers_are_reaped_on_drain() {
        let script = NamedTempFile::new().unwrap();
        let registry: RefCell<WorkerRegistry<()>> = RefCell::new(WorkerRegistry::new("main"));
        let id = registry.borrow_mut().spawn(script.path(), echo_worker).unwrap();

        registry.borrow().terminate(id).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut reaped = 0;
        while reaped == 0 {
            assert!(Instant::now() < deadline, "timed out waiting for reap");
            reaped += drain_workers(&registry, |_, _, _| {}).reaped;
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(reaped, 1);
        assert!(registry.borrow().state(id).is_none());
    }

    #[test]
    fn terminating_parent_joins_children_first() {
        let script = NamedTempFile::new().unwrap();
        let child_script = script.path().to_path_buf();
        let exits = Arc::new(Mutex::new(Vec::new()));

        let registry: RefCell<WorkerRegistry<()>> = RefCell::new(WorkerRegistry::new("main"));
        let parent_exits = exits.clone();
        let parent = registry
            .borrow_mut()
            .spawn(script.path(), move |endpoint| {
                let mut children: WorkerRegistry<()> = WorkerRegistry::new(endpoint.label());
                let child_exits = parent_exits.clone();
                children
                    .spawn(&child_script, move |child| {
                        while !child.is_terminated() {
                            thread::sleep(Duration::from_millis(1));
                        }
                        child_exits.lock().push(child.label().to_string());
                    })
                    .unwrap();
                endpoint.post(Message::from_json(&json!("ready")));

                while !endpoint.is_terminated() {
                    thread::sleep(Duration::from_millis(1));
                }
                drop(children);
                parent_exits.lock().push(endpoint.label().to_string());
            })
            .unwrap();
        registry.borrow_mut().set_handler(parent, Some(())).unwrap();

        let ready = Rc::new(RefCell::new(false));
        pump(&registry, |_, _, _| *ready.borrow_mut() = true, || *ready.borrow());

        assert!(registry.borrow_mut().release(parent));
        assert_eq!(*exits.lock(), vec!["main/1/1".to_string(), "main/1".to_string()]);
        assert!(registry.borrow().state(parent).is_none());
    }

    #[test]
    fn finished_worker_state_is_terminated() {
        let script = NamedTempFile::new().unwrap();
        let registry: RefCell<WorkerRegistry<()>> = RefCell::new(WorkerRegistry::new("main"));
        let id = registry.borrow_mut().spawn(script.path(), echo_worker).unwrap();
        registry.borrow().terminate(id).unwrap();
        pump(
            &registry,
            |_, _, _| {},
            || registry.borrow().state(id).is_none_or(|state| state == WorkerState::Terminated),
        );
    }
}
