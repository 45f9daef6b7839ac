//! Per-dispatch context propagation.
//!
//! The runtime binds a [`DispatchContext`] (current event, current bot) with
//! [`scope`] before dispatching an event. Any code running inside that
//! scope, including children started through [`spawn`], can read it back
//! with [`current_event`] and [`current_bot`] without threading it through
//! every call.
//!
//! The binding is task-local: two dispatches running at the same time never
//! see each other's context, and leaving a scope restores whatever binding
//! was active outside it.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::bot::Bot;
use crate::event::Event;

tokio::task_local! {
    static CURRENT: DispatchContext;
}

/// The (event, connection) pair bound for one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    event: Arc<Event>,
    bot: Option<Arc<Bot>>,
}

impl DispatchContext {
    /// Creates a context with no bot attached.
    pub fn new(event: Arc<Event>) -> Self {
        Self { event, bot: None }
    }

    /// Attaches the bot that received the event.
    pub fn with_bot(mut self, bot: Arc<Bot>) -> Self {
        self.bot = Some(bot);
        self
    }

    pub fn event(&self) -> &Arc<Event> {
        &self.event
    }

    pub fn bot(&self) -> Option<&Arc<Bot>> {
        self.bot.as_ref()
    }
}

/// Runs `fut` with `ctx` bound as the current dispatch context.
pub async fn scope<F: Future>(ctx: DispatchContext, fut: F) -> F::Output {
    CURRENT.scope(ctx, fut).await
}

/// Returns the context bound to the running task, if any.
pub fn current() -> Option<DispatchContext> {
    CURRENT.try_with(Clone::clone).ok()
}

/// Returns the event being handled by the running task.
pub fn current_event() -> Option<Arc<Event>> {
    CURRENT.try_with(|ctx| ctx.event.clone()).ok()
}

/// Returns the bot the current event arrived on.
pub fn current_bot() -> Option<Arc<Bot>> {
    CURRENT.try_with(|ctx| ctx.bot.clone()).ok().flatten()
}

/// Captures the current context now and re-binds it around `fut`.
///
/// Use this for futures that will be polled on another task.
pub fn propagate<F: Future>(fut: F) -> impl Future<Output = F::Output> {
    let ctx = current();
    async move {
        match ctx {
            Some(ctx) => CURRENT.scope(ctx, fut).await,
            None => fut.await,
        }
    }
}

/// Spawns a child task that inherits the current context.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(propagate(fut))
}
