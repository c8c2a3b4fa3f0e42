//! Configuration loading and management

use crate::core::error::ConfigError;
use crate::core::query_tool::{DEFAULT_MAX_PAGE, PageLimits};
use crate::core::whitelist::{ColumnDef, ColumnKind, TableSchema, Whitelist};
use crate::warning::model::{ASSET_HOLDERS, ASSETS, WARNINGS};
use crate::warning::templates::{TemplateConfig, TemplateRegistry, default_templates};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Pagination limits and the column whitelist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Deepest row reachable with offset pagination
    #[serde(default = "default_max_page")]
    pub max_page: u64,

    #[serde(default = "default_limit")]
    pub default_limit: u64,

    #[serde(default = "default_max_limit")]
    pub max_limit: u64,

    /// Table alias -> whitelisted schema
    #[serde(default)]
    pub tables: BTreeMap<String, TableSchema>,
}

fn default_max_page() -> u64 {
    DEFAULT_MAX_PAGE
}

fn default_limit() -> u64 {
    PageLimits::default().default_limit
}

fn default_max_limit() -> u64 {
    PageLimits::default().max_limit
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_page: default_max_page(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            tables: BTreeMap::new(),
        }
    }
}

/// Message templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_templates")]
    pub templates: Vec<TemplateConfig>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            templates: default_templates(),
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            message: format!("{}: {}", path.display(), e),
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            file: Some(path.display().to_string()),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
            file: None,
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check limits, the whitelist and every template
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = self.page_limits();
        if limits.default_limit == 0 || limits.default_limit > limits.max_limit {
            return Err(ConfigError::InvalidValue {
                field: "query.default_limit".to_string(),
                value: limits.default_limit.to_string(),
                message: format!("must be between 1 and max_limit ({})", limits.max_limit),
            });
        }
        if limits.max_page < limits.max_limit {
            return Err(ConfigError::InvalidValue {
                field: "query.max_page".to_string(),
                value: limits.max_page.to_string(),
                message: format!("must be at least max_limit ({})", limits.max_limit),
            });
        }
        let whitelist = self.whitelist()?;
        for alias in [WARNINGS, ASSETS, ASSET_HOLDERS] {
            if whitelist.table(alias).is_err() {
                return Err(ConfigError::InvalidValue {
                    field: "query.tables".to_string(),
                    value: alias.to_string(),
                    message: "required table is not configured".to_string(),
                });
            }
        }
        self.template_registry()?;
        Ok(())
    }

    pub fn whitelist(&self) -> Result<Whitelist, ConfigError> {
        Whitelist::new(self.query.tables.clone())
    }

    pub fn page_limits(&self) -> PageLimits {
        PageLimits {
            max_page: self.query.max_page,
            default_limit: self.query.default_limit,
            max_limit: self.query.max_limit,
        }
    }

    pub fn template_registry(&self) -> Result<TemplateRegistry, ConfigError> {
        TemplateRegistry::new(self.notifications.templates.clone())
    }

    /// Built-in configuration for the warning, asset and holder tables
    pub fn default_config() -> Self {
        let mut tables = BTreeMap::new();
        tables.insert(
            ASSETS.to_string(),
            TableSchema::new(ASSETS, "asset")
                .column("id", ColumnDef::new(ColumnKind::Integer).unique())
                .column("holder_id", ColumnDef::new(ColumnKind::Integer))
                .column("asset_type_id", ColumnDef::new(ColumnKind::Integer))
                .column("name", ColumnDef::new(ColumnKind::Text))
                .column("installed_on", ColumnDef::new(ColumnKind::Date))
                .column("location", ColumnDef::new(ColumnKind::Geometry)),
        );
        tables.insert(
            ASSET_HOLDERS.to_string(),
            TableSchema::new(ASSET_HOLDERS, "asset_holder")
                .column("id", ColumnDef::new(ColumnKind::Integer).unique())
                .column("name", ColumnDef::new(ColumnKind::Text))
                .column("email", ColumnDef::new(ColumnKind::Text))
                .column("phone", ColumnDef::new(ColumnKind::Text))
                .column("notify_email", ColumnDef::new(ColumnKind::Boolean))
                .column("notify_sms", ColumnDef::new(ColumnKind::Boolean)),
        );
        tables.insert(
            WARNINGS.to_string(),
            TableSchema::new(WARNINGS, "warning")
                .column("id", ColumnDef::new(ColumnKind::Integer).unique())
                .column("warning_type", ColumnDef::new(ColumnKind::Text))
                .column("severity", ColumnDef::new(ColumnKind::Text))
                .column("headline", ColumnDef::new(ColumnKind::Text))
                .column("description", ColumnDef::new(ColumnKind::Text))
                .column("valid_from", ColumnDef::new(ColumnKind::Timestamp))
                .column("valid_to", ColumnDef::new(ColumnKind::Timestamp))
                .column("area", ColumnDef::new(ColumnKind::Geometry)),
        );

        Self {
            server: ServerConfig::default(),
            query: QueryConfig {
                tables,
                ..QueryConfig::default()
            },
            notifications: NotificationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default_config();
        assert_eq!(config.query.tables.len(), 3);
        assert_eq!(config.server.bind, "127.0.0.1:3000");
        assert_eq!(config.page_limits().max_page, 1000);
        config.validate().unwrap();
        assert_eq!(config.template_registry().unwrap().len(), 2);
    }

    #[test]
    fn test_yaml_round_trip_keeps_whitelist() {
        let config = AppConfig::default_config();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = AppConfig::from_yaml_str(&yaml).unwrap();
        let whitelist = parsed.whitelist().unwrap();
        assert_eq!(whitelist.aliases(), vec!["asset_holders", "assets", "warnings"]);
        assert_eq!(whitelist.table("assets").unwrap().table, "asset");
    }

    #[test]
    fn test_default_limit_above_max_is_rejected() {
        let mut config = AppConfig::default_config();
        config.query.default_limit = config.query.max_limit + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "query.default_limit"
        ));
    }

    #[test]
    fn test_missing_required_table_is_rejected() {
        let mut config = AppConfig::default_config();
        config.query.tables.remove(ASSET_HOLDERS);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { value, .. }) if value == "asset_holders"
        ));
    }
}
