//! Server host for transport-agnostic API exposure
//!
//! `ServerHost` holds everything a handler needs: the configuration, the
//! query tool, the row store and the warning ingestor. Exposures borrow it
//! through an `Arc` and never own state of their own.

use crate::config::AppConfig;
use crate::core::query_tool::QueryTool;
use crate::core::store::RowStore;
use crate::warning::ingest::WarningIngestor;
use crate::warning::notifier::{Dispatcher, Notifier, SendLog};
use anyhow::Result;
use std::sync::Arc;

/// Host context containing all service state
#[derive(Clone)]
pub struct ServerHost {
    pub config: Arc<AppConfig>,
    pub tool: Arc<QueryTool>,
    pub store: Arc<dyn RowStore>,
    pub ingestor: Arc<WarningIngestor>,
}

impl ServerHost {
    /// Wire the host from its collaborators
    ///
    /// Fails when the whitelist or a template in `config` is invalid.
    pub fn from_components(
        config: AppConfig,
        store: Arc<dyn RowStore>,
        send_log: Arc<dyn SendLog>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self> {
        config.validate()?;
        let tool = Arc::new(QueryTool::new(
            Arc::new(config.whitelist()?),
            config.page_limits(),
        ));
        let notifier = Notifier::new(Arc::new(config.template_registry()?), dispatcher, send_log);
        let ingestor = Arc::new(WarningIngestor::new(tool.clone(), store.clone(), notifier));

        Ok(Self {
            config: Arc::new(config),
            tool,
            store,
            ingestor,
        })
    }

    pub fn table_aliases(&self) -> Vec<&str> {
        self.tool.whitelist().aliases()
    }
}
