//! The handler registry.
//!
//! An ordered table of [`Registration`]s. Registration order is significant:
//! the dispatcher visits handlers in exactly this order, and removals never
//! reorder the survivors.
//!
//! The table is copy-on-write. [`Registry::snapshot`] hands out the current
//! `Arc<Vec<_>>`, so a dispatch iterates an immutable list while plugins are
//! registered or removed concurrently.

use std::fmt;
use std::sync::Arc;

use linbot_core::Event;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::handler::{BoxedHandler, Handler, into_handler};
use crate::matcher::{MatchResult, Matcher};

/// Plugin label used when neither the matcher nor the ambient scope names one.
pub const UNKNOWN_PLUGIN: &str = "unknown";

/// Opaque identifier of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One registered handler and its metadata.
pub struct Registration {
    id: HandlerId,
    name: String,
    plugin: String,
    matcher: Matcher,
    handler: BoxedHandler,
}

impl Registration {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn handler(&self) -> &BoxedHandler {
        &self.handler
    }

    pub fn is_blocking(&self) -> bool {
        self.matcher.is_blocking()
    }

    /// Post-type allowlist check.
    pub fn allows(&self, event: &Event) -> bool {
        self.matcher.allows(event)
    }

    /// Structural eligibility.
    ///
    /// A handler with no event-typed parameter is eligible for every event;
    /// otherwise at least one declared event type must accept the event.
    pub fn is_eligible(&self, event: &Event) -> bool {
        let mut declared = false;
        for ty in self.handler.slots().iter().filter_map(|s| s.event_type()) {
            if ty.accepts(event) {
                return true;
            }
            declared = true;
        }
        !declared
    }

    /// Runs the predicate against the event's raw text.
    pub fn check(&self, event: &Event) -> MatchResult {
        self.matcher.check(&self.name, event.raw_text())
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("plugin", &self.plugin)
            .field("slots", &self.handler.slots())
            .field("block", &self.matcher.is_blocking())
            .finish()
    }
}

/// Immutable view of the registry at one point in time.
pub type Snapshot = Arc<Vec<Arc<Registration>>>;

/// Ordered, concurrently readable table of handlers.
#[derive(Default)]
pub struct Registry {
    entries: RwLock<Snapshot>,
    current_plugin: Mutex<Option<String>>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .field("plugins", &self.plugins())
            .finish()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler function.
    pub fn register<F, T>(&self, matcher: Matcher, handler: F) -> HandlerId
    where
        F: Handler<T>,
        T: 'static,
    {
        self.register_boxed(matcher, into_handler(handler))
    }

    /// Registers an already type-erased handler.
    ///
    /// The name defaults to the handler's own function name, or to
    /// `handler-<id>` for closures; the plugin defaults to the ambient label
    /// set by [`plugin_scope`](Self::plugin_scope).
    pub fn register_boxed(&self, matcher: Matcher, handler: BoxedHandler) -> HandlerId {
        let id = HandlerId::new();
        let name = matcher
            .name
            .clone()
            .or_else(|| handler.default_name().map(str::to_string))
            .unwrap_or_else(|| format!("handler-{id}"));
        let plugin = matcher
            .plugin
            .clone()
            .or_else(|| self.current_plugin.lock().clone())
            .unwrap_or_else(|| UNKNOWN_PLUGIN.to_string());

        debug!(handler_id = %id, handler = %name, plugin = %plugin, "Registered handler");

        let registration = Arc::new(Registration {
            id,
            name,
            plugin,
            matcher,
            handler,
        });

        let mut entries = self.entries.write();
        Arc::make_mut(&mut *entries).push(registration);
        id
    }

    /// Removes one registration. Returns `false` if it was already gone.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut entries = self.entries.write();
        let Some(pos) = entries.iter().position(|r| r.id == id) else {
            return false;
        };
        let removed = Arc::make_mut(&mut *entries).remove(pos);
        debug!(handler_id = %id, handler = %removed.name, "Unregistered handler");
        true
    }

    /// Removes every registration owned by `plugin`, keeping the others in
    /// their relative order. Returns how many were removed.
    pub fn unregister_plugin(&self, plugin: &str) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        if !entries.iter().any(|r| r.plugin == plugin) {
            return 0;
        }
        Arc::make_mut(&mut *entries).retain(|r| r.plugin != plugin);
        let removed = before - entries.len();
        info!(plugin = %plugin, count = removed, "Unregistered plugin handlers");
        removed
    }

    /// Removes everything, typically before a reload.
    pub fn clear(&self) {
        *self.entries.write() = Arc::default();
    }

    /// Returns the current registrations in registration order.
    pub fn snapshot(&self) -> Snapshot {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registrations owned by `plugin`, in registration order.
    pub fn plugin_handlers(&self, plugin: &str) -> Vec<Arc<Registration>> {
        self.entries
            .read()
            .iter()
            .filter(|r| r.plugin == plugin)
            .cloned()
            .collect()
    }

    /// Distinct plugin labels in order of first registration.
    pub fn plugins(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for r in self.entries.read().iter() {
            if !labels.contains(&r.plugin) {
                labels.push(r.plugin.clone());
            }
        }
        labels
    }

    /// Sets the ambient plugin label until the returned guard is dropped.
    ///
    /// Registrations made meanwhile without an explicit plugin are owned by
    /// `label`. Dropping the guard restores the previous label.
    pub fn plugin_scope(&self, label: impl Into<String>) -> PluginScope<'_> {
        let previous = self.current_plugin.lock().replace(label.into());
        PluginScope {
            registry: self,
            previous,
        }
    }

    /// The ambient plugin label, if one is set.
    pub fn current_plugin(&self) -> Option<String> {
        self.current_plugin.lock().clone()
    }
}

/// Guard returned by [`Registry::plugin_scope`].
#[must_use = "the plugin label is cleared as soon as the guard is dropped"]
pub struct PluginScope<'a> {
    registry: &'a Registry,
    previous: Option<String>,
}

impl Drop for PluginScope<'_> {
    fn drop(&mut self) {
        *self.registry.current_plugin.lock() = self.previous.take();
    }
}
