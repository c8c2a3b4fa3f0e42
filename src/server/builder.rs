//! Fluent assembly of the stormwatch HTTP service

use super::exposure::RestExposure;
use super::host::ServerHost;
use crate::config::AppConfig;
use crate::core::store::RowStore;
use crate::storage::InMemorySendLog;
use crate::warning::notifier::{Dispatcher, LogDispatcher, SendLog};
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Collects the store, send log and dispatcher behind the REST router
///
/// Only the row store is required. The configuration defaults to
/// [`AppConfig::default_config`], the send log to an in-memory one and
/// the dispatcher to [`LogDispatcher`].
///
/// # Example
///
/// ```ignore
/// ServerBuilder::new()
///     .with_config(AppConfig::from_yaml_file("stormwatch.yaml")?)
///     .with_store(InMemoryRowStore::new())
///     .serve("127.0.0.1:3000")
///     .await?;
/// ```
pub struct ServerBuilder {
    config: Option<AppConfig>,
    store: Option<Arc<dyn RowStore>>,
    send_log: Option<Arc<dyn SendLog>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    custom_routes: Vec<Router>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            store: None,
            send_log: None,
            dispatcher: None,
            custom_routes: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the row store (required)
    pub fn with_store(mut self, store: impl RowStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set the row store from an existing handle, e.g. one shared with tests
    pub fn with_shared_store(mut self, store: Arc<dyn RowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_send_log(mut self, send_log: Arc<dyn SendLog>) -> Self {
        self.send_log = Some(send_log);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Add routes outside the query and warning API
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Build the transport-agnostic host
    pub fn build_host(&mut self) -> Result<ServerHost> {
        let store = self
            .store
            .take()
            .ok_or_else(|| anyhow::anyhow!("RowStore is required. Call .with_store()"))?;
        let config = self.config.take().unwrap_or_else(AppConfig::default_config);
        let send_log = self
            .send_log
            .take()
            .unwrap_or_else(|| Arc::new(InMemorySendLog::new()));
        let dispatcher = self
            .dispatcher
            .take()
            .unwrap_or_else(|| Arc::new(LogDispatcher));

        ServerHost::from_components(config, store, send_log, dispatcher)
    }

    /// Build the REST router
    pub fn build(mut self) -> Result<Router> {
        let host = Arc::new(self.build_host()?);
        RestExposure::build_router(host, std::mem::take(&mut self.custom_routes))
    }

    /// Bind `addr` and serve until SIGTERM or Ctrl+C
    pub async fn serve(self, addr: &str) -> Result<()> {
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!(%addr, "stormwatch listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("stormwatch stopped");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let signal = tokio::select! {
        _ = ctrl_c => "ctrl-c",
        _ = terminate => "sigterm",
    };
    tracing::info!(signal, "draining in-flight requests");
}
