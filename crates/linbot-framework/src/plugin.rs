//! Plugin contract and loader.
//!
//! A plugin is a compiled unit that registers handlers. The loader runs each
//! plugin's registration code inside a [`plugin_scope`](Registry::plugin_scope)
//! so every handler it registers is labelled with the plugin's name, and the
//! whole plugin can later be removed with
//! [`Registry::unregister_plugin`].
//!
//! # Example
//!
//! ```rust,ignore
//! use linbot_framework::{Plugin, Registry, on_command};
//!
//! struct Echo;
//!
//! impl Plugin for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     fn register(&self, registry: &Registry) -> anyhow::Result<()> {
//!         registry.register(on_command("/echo"), echo);
//!         Ok(())
//!     }
//! }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::registry::Registry;

/// A unit of handler registrations.
pub trait Plugin: Send + Sync {
    /// The label owning this plugin's handlers.
    fn name(&self) -> &str;

    /// Registers the plugin's handlers.
    fn register(&self, registry: &Registry) -> anyhow::Result<()>;
}

/// Shared plugin trait object.
pub type BoxedPlugin = Arc<dyn Plugin>;

/// A plugin backed by a registration function.
pub struct FnPlugin<F> {
    name: String,
    f: F,
}

impl<F> Plugin for FnPlugin<F>
where
    F: Fn(&Registry) -> anyhow::Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn register(&self, registry: &Registry) -> anyhow::Result<()> {
        (self.f)(registry)
    }
}

/// Wraps a registration function as a plugin.
pub fn plugin_fn<F>(name: impl Into<String>, f: F) -> BoxedPlugin
where
    F: Fn(&Registry) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(FnPlugin {
        name: name.into(),
        f,
    })
}

/// What happened during [`PluginLoader::load_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Loaded plugins with their handler counts.
    pub loaded: Vec<(String, usize)>,
    /// Plugins whose registration failed, with the error.
    pub failed: Vec<(String, String)>,
    /// Plugins skipped because they are disabled.
    pub skipped: Vec<String>,
}

/// Loads plugins into a registry.
pub struct PluginLoader {
    registry: Arc<Registry>,
    disabled: HashSet<String>,
}

impl fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginLoader")
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

impl PluginLoader {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            disabled: HashSet::new(),
        }
    }

    /// Names of plugins that must not be loaded.
    pub fn with_disabled<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled.extend(names.into_iter().map(Into::into));
        self
    }

    /// Loads one plugin and returns how many handlers it registered.
    ///
    /// On failure, the handlers it managed to register are removed again.
    pub fn load(&self, plugin: &dyn Plugin) -> anyhow::Result<usize> {
        let name = plugin.name();
        let result = {
            let _scope = self.registry.plugin_scope(name);
            plugin.register(&self.registry)
        };

        match result {
            Ok(()) => Ok(self.registry.plugin_handlers(name).len()),
            Err(err) => {
                let removed = self.registry.unregister_plugin(name);
                if removed > 0 {
                    warn!(plugin = %name, removed, "Removed partial registrations of failed plugin");
                }
                Err(err)
            }
        }
    }

    /// Clears the registry and loads every plugin in order.
    ///
    /// A failing plugin is logged and skipped; the others still load.
    pub fn load_all(&self, plugins: &[BoxedPlugin]) -> LoadReport {
        self.registry.clear();
        let mut report = LoadReport::default();

        for plugin in plugins {
            let name = plugin.name().to_string();
            if self.disabled.contains(&name) {
                info!(plugin = %name, "Plugin disabled, skipping");
                report.skipped.push(name);
                continue;
            }

            match self.load(plugin.as_ref()) {
                Ok(count) => {
                    info!(plugin = %name, handlers = count, "Plugin loaded");
                    report.loaded.push((name, count));
                }
                Err(err) => {
                    error!(plugin = %name, error = %format!("{err:#}"), "Plugin failed to load");
                    report.failed.push((name, err.to_string()));
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            handlers = self.registry.len(),
            "Plugins loaded"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;
    use crate::matcher::{on_command, on_message};

    async fn noop() {}

    fn plugins() -> Vec<BoxedPlugin> {
        vec![
            plugin_fn("echo", |r| {
                r.register(on_command("/echo"), noop);
                r.register(on_command("/ping"), noop);
                Ok(())
            }),
            plugin_fn("broken", |r| {
                r.register(on_message(), noop);
                bail!("missing configuration")
            }),
            plugin_fn("logger", |r| {
                r.register(on_message(), noop);
                Ok(())
            }),
        ]
    }

    #[test]
    fn test_load_all_isolates_failing_plugin() {
        let registry = Arc::new(Registry::new());
        let loader = PluginLoader::new(registry.clone());

        let report = loader.load_all(&plugins());
        assert_eq!(
            report.loaded,
            [("echo".to_string(), 2), ("logger".to_string(), 1)]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
        assert_eq!(registry.plugins(), ["echo", "logger"]);
        assert!(registry.current_plugin().is_none());
    }

    #[test]
    fn test_load_all_clears_previous_registrations() {
        let registry = Arc::new(Registry::new());
        registry.register(on_message(), noop);

        let loader = PluginLoader::new(registry.clone()).with_disabled(["logger"]);
        let report = loader.load_all(&plugins());

        assert_eq!(report.skipped, ["logger"]);
        assert_eq!(registry.plugins(), ["echo"]);
        assert_eq!(registry.len(), 2);
    }
}
