//! Notification templates
//!
//! Templates are selected by `(asset_type_id, warning_type, severity,
//! channel)`. Any selector left out of a template's config matches every
//! value; among matching templates the one with the most selectors set
//! wins, and the first declared wins a tie.

use crate::core::error::ConfigError;
use crate::warning::model::{Asset, AssetHolder, Channel, Warning};
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};

/// One configured template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub id: String,
    pub channel: Channel,
    #[serde(default)]
    pub asset_type_id: Option<i64>,
    #[serde(default)]
    pub warning_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    /// Email subject; ignored for SMS
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
}

impl TemplateConfig {
    fn matches(
        &self,
        asset_type_id: i64,
        warning_type: &str,
        severity: &str,
        channel: Channel,
    ) -> bool {
        self.channel == channel
            && self.asset_type_id.is_none_or(|id| id == asset_type_id)
            && self.warning_type.as_deref().is_none_or(|t| t == warning_type)
            && self.severity.as_deref().is_none_or(|s| s == severity)
    }

    fn specificity(&self) -> usize {
        [
            self.asset_type_id.is_some(),
            self.warning_type.is_some(),
            self.severity.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    fn body_name(&self) -> String {
        format!("{}.body", self.id)
    }

    fn subject_name(&self) -> String {
        format!("{}.subject", self.id)
    }
}

/// Rendered text of one notification
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub template_id: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Compiled templates
#[derive(Debug)]
pub struct TemplateRegistry {
    tera: Tera,
    entries: Vec<TemplateConfig>,
}

impl TemplateRegistry {
    /// Compile every template; a syntax error fails the whole registry
    pub fn new(entries: Vec<TemplateConfig>) -> Result<Self, ConfigError> {
        let mut tera = Tera::default();
        for (idx, entry) in entries.iter().enumerate() {
            if entries[..idx].iter().any(|e| e.id == entry.id) {
                return Err(ConfigError::InvalidValue {
                    field: "notifications.templates.id".to_string(),
                    value: entry.id.clone(),
                    message: "duplicate template id".to_string(),
                });
            }
            let invalid = |e: tera::Error| ConfigError::InvalidValue {
                field: format!("notifications.templates.{}", entry.id),
                value: entry.id.clone(),
                message: e.to_string(),
            };
            tera.add_raw_template(&entry.body_name(), &entry.body)
                .map_err(invalid)?;
            if let Some(subject) = &entry.subject {
                tera.add_raw_template(&entry.subject_name(), subject)
                    .map_err(invalid)?;
            }
        }
        Ok(Self { tera, entries })
    }

    /// Most specific template for the selectors
    pub fn select(
        &self,
        asset_type_id: i64,
        warning_type: &str,
        severity: &str,
        channel: Channel,
    ) -> Option<&TemplateConfig> {
        self.entries
            .iter()
            .filter(|t| t.matches(asset_type_id, warning_type, severity, channel))
            .fold(None, |best: Option<&TemplateConfig>, t| match best {
                Some(b) if b.specificity() >= t.specificity() => Some(b),
                _ => Some(t),
            })
    }

    /// Render `template` for one warning, asset and holder
    ///
    /// The template sees `warning`, `asset` and `holder` as objects.
    pub fn render(
        &self,
        template: &TemplateConfig,
        warning: &Warning,
        asset: &Asset,
        holder: &AssetHolder,
    ) -> Result<RenderedMessage, tera::Error> {
        let mut context = Context::new();
        context.insert("warning", warning);
        context.insert("asset", asset);
        context.insert("holder", holder);

        let body = self.tera.render(&template.body_name(), &context)?;
        let subject = match (&template.subject, template.channel) {
            (Some(_), Channel::Email) => {
                Some(self.tera.render(&template.subject_name(), &context)?)
            }
            _ => None,
        };
        Ok(RenderedMessage {
            template_id: template.id.clone(),
            subject,
            body,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Built-in catch-all templates, one per channel
pub fn default_templates() -> Vec<TemplateConfig> {
    vec![
        TemplateConfig {
            id: "default-email".to_string(),
            channel: Channel::Email,
            asset_type_id: None,
            warning_type: None,
            severity: None,
            subject: Some("[{{ warning.severity }}] {{ warning.headline }}".to_string()),
            body: "Hello {{ holder.name }},\n\n\
                   a {{ warning.warning_type }} warning ({{ warning.severity }}) affects \
                   your asset {{ asset.name }}.\n\n{{ warning.headline }}\n\
                   {% if warning.description %}{{ warning.description }}\n{% endif %}\
                   Valid from {{ warning.valid_from }}\
                   {% if warning.valid_to %} until {{ warning.valid_to }}{% endif %}.\n"
                .to_string(),
        },
        TemplateConfig {
            id: "default-sms".to_string(),
            channel: Channel::Sms,
            asset_type_id: None,
            warning_type: None,
            severity: None,
            subject: None,
            body: "{{ warning.severity | upper }}: {{ warning.headline }} at {{ asset.name }}"
                .to_string(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::Geometry;
    use chrono::{TimeZone, Utc};

    fn fixtures() -> (Warning, Asset, AssetHolder) {
        let warning = Warning {
            id: 1,
            warning_type: "frost".into(),
            severity: "minor".into(),
            headline: "Ground frost".into(),
            description: None,
            valid_from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            valid_to: None,
            area: Geometry::Point([0.0, 0.0]),
        };
        let asset = Asset {
            id: 2,
            holder_id: 3,
            asset_type_id: 9,
            name: "Greenhouse".into(),
            installed_on: None,
            location: Geometry::Point([0.0, 0.0]),
        };
        let holder = AssetHolder {
            id: 3,
            name: "Farm".into(),
            email: Some("farm@example.com".into()),
            phone: None,
            notify_email: true,
            notify_sms: false,
        };
        (warning, asset, holder)
    }

    #[test]
    fn test_most_specific_template_wins() {
        let mut specific = default_templates()[1].clone();
        specific.id = "frost-greenhouse".into();
        specific.asset_type_id = Some(9);
        specific.warning_type = Some("frost".into());
        let registry =
            TemplateRegistry::new(vec![default_templates()[1].clone(), specific]).unwrap();

        let hit = registry.select(9, "frost", "minor", Channel::Sms).unwrap();
        assert_eq!(hit.id, "frost-greenhouse");
        let fallback = registry.select(4, "frost", "minor", Channel::Sms).unwrap();
        assert_eq!(fallback.id, "default-sms");
        assert!(registry.select(9, "frost", "minor", Channel::Email).is_none());
    }

    #[test]
    fn test_render_default_templates() {
        let registry = TemplateRegistry::new(default_templates()).unwrap();
        let (warning, asset, holder) = fixtures();

        let email = registry.select(9, "frost", "minor", Channel::Email).unwrap();
        let msg = registry.render(email, &warning, &asset, &holder).unwrap();
        assert_eq!(msg.subject.as_deref(), Some("[minor] Ground frost"));
        assert!(msg.body.contains("Hello Farm"));
        assert!(msg.body.contains("Greenhouse"));

        let sms = registry.select(9, "frost", "minor", Channel::Sms).unwrap();
        let msg = registry.render(sms, &warning, &asset, &holder).unwrap();
        assert_eq!(msg.body, "MINOR: Ground frost at Greenhouse");
        assert_eq!(msg.subject, None);
    }

    #[test]
    fn test_rejects_bad_syntax_and_duplicates() {
        let mut broken = default_templates()[0].clone();
        broken.body = "{{ unclosed".into();
        assert!(TemplateRegistry::new(vec![broken]).is_err());

        let dup = default_templates()[0].clone();
        assert!(TemplateRegistry::new(vec![dup.clone(), dup]).is_err());
    }
}
