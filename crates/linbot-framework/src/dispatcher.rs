//! Event dispatcher for the Linbot framework.
//!
//! [`Dispatcher::dispatch`] drives one event through a registry snapshot in
//! registration order. For each registration:
//!
//! 1. Registrations whose post-type allowlist excludes the event are skipped
//! 2. Registrations whose parameter types cannot accept the event are skipped
//! 3. The predicate runs against the event's raw text
//! 4. On a match the handler is spawned as its own task
//! 5. If the registration is blocking, no later registration is considered
//!
//! Spawned handlers run concurrently with each other and with the caller.
//! Each one runs inside the dispatch context of its event, and any fault it
//! raises (error return, failed extraction or panic) is logged here and goes
//! no further.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use linbot_core::context::{self, DispatchContext};
use linbot_core::{Bot, Event};
use tokio_util::task::TaskTracker;
use tracing::{Level, debug, error, span, trace};

use crate::error::HandlerError;
use crate::extractor::Invocation;
use crate::registry::{Registration, Registry};

/// The central event dispatcher.
///
/// Cheap to clone; clones share the registry and the task tracker.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            tasks: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Number of handler tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Dispatches `event` to every applicable handler.
    ///
    /// The bot is taken from the surrounding dispatch context, if one is
    /// bound. Returns once every applicable handler has been spawned; it does
    /// not wait for them.
    ///
    /// # Panics
    ///
    /// Panics if a handler matches and no tokio runtime is running on the
    /// calling thread.
    pub fn dispatch(&self, event: Arc<Event>) {
        let span = span!(Level::DEBUG, "dispatch", event = %event.name());
        let _enter = span.enter();

        let bot = context::current_bot();
        let snapshot = self.registry.snapshot();

        for registration in snapshot.iter() {
            if !registration.allows(&event) {
                trace!(handler = %registration.name(), "Post type not allowed, skipping");
                continue;
            }
            if !registration.is_eligible(&event) {
                trace!(handler = %registration.name(), "Event type not accepted, skipping");
                continue;
            }

            let result = registration.check(&event);
            if !result.matched {
                continue;
            }

            let inv = Invocation::new(event.clone())
                .with_bot(bot.clone())
                .with_remainder(result.remainder);
            self.spawn(registration.clone(), inv, bot.clone());

            if registration.is_blocking() {
                debug!(
                    handler = %registration.name(),
                    "Blocking handler matched, stopping dispatch"
                );
                break;
            }
        }
    }

    fn spawn(&self, registration: Arc<Registration>, inv: Invocation, bot: Option<Arc<Bot>>) {
        let mut ctx = DispatchContext::new(inv.event().clone());
        if let Some(bot) = bot {
            ctx = ctx.with_bot(bot);
        }

        debug!(
            handler_id = %registration.id(),
            handler = %registration.name(),
            plugin = %registration.plugin(),
            "Invoking handler"
        );

        let call = registration.handler().call(inv);
        self.tasks.spawn(context::scope(ctx, async move {
            let outcome = match AssertUnwindSafe(call).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(HandlerError::Panicked(panic_message(&*panic))),
            };
            if let Err(err) = outcome {
                error!(
                    handler_id = %registration.id(),
                    handler = %registration.name(),
                    plugin = %registration.plugin(),
                    error = %err,
                    "Handler failed"
                );
            }
        }));
    }

    /// Waits for every spawned handler to finish.
    ///
    /// Dispatching may continue while draining; handlers spawned meanwhile
    /// are waited for too.
    pub async fn drain(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.registry.len())
            .field("in_flight", &self.tasks.len())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use linbot_core::GroupMessageEvent;
    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::extractor::{CommandArgs, EventContext};
    use crate::matcher::{on_command, on_message};

    /// Records handler invocations in order of arrival.
    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().push(entry.into());
        }

        fn sorted(&self) -> Vec<String> {
            let mut entries = self.0.lock().clone();
            entries.sort();
            entries
        }
    }

    async fn explode() {
        panic!("handler exploded");
    }

    #[test]
    #[should_panic]
    fn test_dispatch_outside_runtime_panics() {
        let registry = Arc::new(Registry::new());
        registry.register(on_message(), explode);
        Dispatcher::new(registry).dispatch(group_event("hi"));
    }

    #[test]
    fn test_dispatch_without_matches_needs_no_runtime() {
        let registry = Arc::new(Registry::new());
        registry.register(on_command("/ping"), explode);
        let dispatcher = Dispatcher::new(registry);
        dispatcher.dispatch(group_event("hi"));
        assert_eq!(dispatcher.in_flight(), 0);
    }

    fn group_event(raw: &str) -> Arc<Event> {
        Arc::new(
            Event::from_value(json!({
                "post_type": "message", "message_type": "group",
                "group_id": 100, "user_id": 200, "raw_message": raw
            }))
            .unwrap(),
        )
    }

    fn private_event(raw: &str) -> Arc<Event> {
        Arc::new(
            Event::from_value(json!({
                "post_type": "message", "message_type": "private",
                "user_id": 200, "raw_message": raw
            }))
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_visits_in_registration_order() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        for label in ["a", "b", "c"] {
            let tx = tx.clone();
            registry.register(on_message().name(label), move || {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(label);
                }
            });
        }

        // A current-thread runtime runs spawned tasks in spawn order.
        dispatcher.dispatch(group_event("hi"));
        dispatcher.drain().await;

        let mut seen = Vec::new();
        while let Ok(label) = rx.try_recv() {
            seen.push(label);
        }
        assert_eq!(seen, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_block_stops_later_handlers() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let log = Log::default();

        let l = log.clone();
        registry.register(on_message().name("first"), move || {
            let l = l.clone();
            async move { l.push("first") }
        });
        let l = log.clone();
        registry.register(on_command("/stop").block(true), move || {
            let l = l.clone();
            async move { l.push("blocker") }
        });
        let l = log.clone();
        registry.register(on_message().name("last"), move || {
            let l = l.clone();
            async move { l.push("last") }
        });

        dispatcher.dispatch(group_event("/stop"));
        dispatcher.drain().await;
        assert_eq!(log.sorted(), ["blocker", "first"]);

        // The blocker does not match, so nothing is blocked.
        dispatcher.dispatch(group_event("go"));
        dispatcher.drain().await;
        assert_eq!(log.sorted(), ["blocker", "first", "first", "last"]);
    }

    #[tokio::test]
    async fn test_fault_does_not_stop_later_handlers() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let log = Log::default();

        registry.register(on_message().name("panics"), explode);
        registry.register(on_message().name("errors"), || async {
            Err::<(), _>("handler failed")
        });
        // on_message yields no remainder, so CommandArgs cannot be built.
        registry.register(
            on_message().name("mismatch"),
            |_: EventContext<GroupMessageEvent>, _: CommandArgs| async {},
        );
        let l = log.clone();
        registry.register(on_message().name("survivor"), move || {
            let l = l.clone();
            async move { l.push("survivor") }
        });

        dispatcher.dispatch(group_event("hello"));
        dispatcher.drain().await;
        assert_eq!(log.sorted(), ["survivor"]);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_echo_scenario() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = calls.clone();
        registry.register(
            on_command("/echo"),
            move |event: EventContext<GroupMessageEvent>, args: CommandArgs| {
                let c = c.clone();
                async move {
                    c.lock().push((event.group_id, args.to_string()));
                }
            },
        );

        dispatcher.dispatch(group_event("/echo hi"));
        dispatcher.dispatch(private_event("/echo hi"));
        dispatcher.dispatch(group_event("/other"));
        dispatcher.drain().await;

        assert_eq!(*calls.lock(), [(100, " hi".to_string())]);
    }

    #[tokio::test]
    async fn test_post_type_allowlist_prefilters() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let log = Log::default();

        let l = log.clone();
        registry.register(
            on_message().post_types(["message_sent"]),
            move |event: Arc<Event>| {
                let l = l.clone();
                async move { l.push(event.post_type().to_string()) }
            },
        );

        let sent = Arc::new(
            Event::from_value(json!({
                "post_type": "message_sent", "message_type": "group",
                "group_id": 1, "raw_message": "mine"
            }))
            .unwrap(),
        );
        dispatcher.dispatch(group_event("theirs"));
        dispatcher.dispatch(sent);
        dispatcher.drain().await;
        assert_eq!(log.sorted(), ["message_sent"]);
    }

    #[tokio::test]
    async fn test_handlers_see_dispatch_context() {
        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();

        registry.register(on_message(), move || {
            let tx = tx.clone();
            async move {
                let child = context::spawn(async {
                    context::current_event().map(|e| e.raw_text().to_string())
                });
                let _ = tx.send(child.await.ok().flatten());
            }
        });

        dispatcher.dispatch(group_event("one"));
        dispatcher.dispatch(private_event("two"));
        dispatcher.drain().await;

        let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        seen.sort();
        assert_eq!(seen, [Some("one".to_string()), Some("two".to_string())]);
    }
}
