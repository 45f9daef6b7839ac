//! Runtime orchestration.
//!
//! The runtime owns the handler registry, the dispatcher and the session
//! router. Running it loads the plugins, opens the reverse WebSocket listener
//! and serves until shutdown, then waits for in-flight handlers.
//!
//! ```rust,ignore
//! use linbot_runtime::LinbotRuntime;
//!
//! let runtime = LinbotRuntime::builder()
//!     .config_file("linbot.toml")
//!     .plugin(echo_plugin())
//!     .build()?;
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use linbot_core::ListenerHandle;
use linbot_framework::{BoxedPlugin, Dispatcher, LoadReport, PluginLoader, Registry};
use serde::Serialize;
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::{ConfigLoader, LinbotConfig};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::session::Session;

/// How long shutdown waits for running handlers.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// The Linbot runtime.
pub struct LinbotRuntime {
    config: LinbotConfig,
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    session: Arc<Session>,
    plugins: Vec<BoxedPlugin>,
    running: AtomicBool,
}

impl std::fmt::Debug for LinbotRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinbotRuntime")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .field("plugins", &self.plugins.len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl LinbotRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration and initializes logging from it.
    pub fn from_config(config: LinbotConfig) -> Self {
        logging::init_from_config(&config.logging);

        let registry = Arc::new(Registry::new());
        let dispatcher = Dispatcher::new(registry.clone());
        let session = Arc::new(Session::with_timeout(
            dispatcher.clone(),
            config.api.timeout(),
        ));

        info!(
            log_level = %config.logging.level,
            log_format = ?config.logging.format,
            api_timeout_secs = config.api.timeout_secs,
            "Runtime initialized from configuration"
        );

        Self {
            config,
            registry,
            dispatcher,
            session,
            plugins: Vec::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &LinbotConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Adds a plugin; it is loaded when the runtime starts.
    pub fn add_plugin(&mut self, plugin: BoxedPlugin) {
        self.plugins.push(plugin);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// (Re)loads every plugin, skipping those disabled in configuration.
    pub fn load_plugins(&self) -> LoadReport {
        PluginLoader::new(self.registry.clone())
            .with_disabled(self.config.plugins.disabled.iter().cloned())
            .load_all(&self.plugins)
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.run_until(wait_for_shutdown()).await
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyRunning);
        }

        let result = self.serve(shutdown).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    async fn serve<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        info!("Starting Linbot runtime");
        self.load_plugins();

        let listener = self.start_transport().await?;
        info!("Linbot runtime is now running. Press Ctrl+C to stop.");

        shutdown.await;

        info!("Stopping Linbot runtime");
        if let Some(listener) = listener {
            listener.stop();
        }

        if tokio::time::timeout(SHUTDOWN_GRACE, self.dispatcher.drain())
            .await
            .is_err()
        {
            warn!(
                in_flight = self.dispatcher.in_flight(),
                "Handlers still running after shutdown grace period"
            );
        }

        info!("Runtime stopped");
        Ok(())
    }

    #[cfg(feature = "ws-server")]
    async fn start_transport(&self) -> RuntimeResult<Option<ListenerHandle>> {
        use linbot_transport::WsServer;

        let server = WsServer::new(self.config.server.to_transport_config());
        let handle = server
            .listen(self.session.clone())
            .await
            .map_err(|e| RuntimeError::Transport(format!("{e:#}")))?;
        Ok(Some(handle))
    }

    #[cfg(not(feature = "ws-server"))]
    async fn start_transport(&self) -> RuntimeResult<Option<ListenerHandle>> {
        warn!("No transport feature enabled, no gateway can connect");
        Ok(None)
    }
}

/// Waits for Ctrl+C, or SIGTERM on unix.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "Failed to register SIGTERM handler");
                wait_for_ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = wait_for_ctrl_c() => {}
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`LinbotRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    plugins: Vec<BoxedPlugin>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            plugins: Vec::new(),
        }
    }

    /// Loads this configuration file instead of searching for one.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Overrides a single configuration key.
    pub fn set<V: Serialize>(mut self, key: &str, value: V) -> Self {
        self.config_loader = self.config_loader.set(key, value);
        self
    }

    pub fn plugin(mut self, plugin: BoxedPlugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn build(self) -> RuntimeResult<LinbotRuntime> {
        let config = self.config_loader.load()?;
        let mut runtime = LinbotRuntime::from_config(config);
        for plugin in self.plugins {
            runtime.add_plugin(plugin);
        }
        Ok(runtime)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use linbot_framework::{on_command, on_message, plugin_fn};
    use tokio::sync::oneshot;

    use super::*;

    async fn noop() {}

    fn test_config() -> LinbotConfig {
        let mut config = LinbotConfig::default();
        // Ephemeral port so tests never collide.
        config.server.port = 0;
        config.plugins.disabled = vec!["admin".to_string()];
        config
    }

    fn runtime() -> LinbotRuntime {
        let mut runtime = LinbotRuntime::from_config(test_config());
        runtime.add_plugin(plugin_fn("echo", |r| {
            r.register(on_command("/echo"), noop);
            Ok(())
        }));
        runtime.add_plugin(plugin_fn("admin", |r| {
            r.register(on_message(), noop);
            Ok(())
        }));
        runtime
    }

    #[test]
    fn test_load_plugins_honors_disabled() {
        let runtime = runtime();
        let report = runtime.load_plugins();

        assert_eq!(report.loaded, [("echo".to_string(), 1)]);
        assert_eq!(report.skipped, ["admin"]);
        assert_eq!(runtime.registry().plugins(), ["echo"]);

        // Reloading replaces, not duplicates.
        runtime.load_plugins();
        assert_eq!(runtime.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let runtime = Arc::new(runtime());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let task = {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                runtime
                    .run_until(async {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        while !runtime.is_running() {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            runtime.run_until(async {}).await,
            Err(RuntimeError::AlreadyRunning)
        ));

        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(!runtime.is_running());
        assert_eq!(runtime.registry().len(), 1);
    }
}
