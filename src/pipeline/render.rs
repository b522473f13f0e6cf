//! Template rendering and `%VARNAME%` substitution.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::automation::{Contact, Template};
use crate::error::ConfigError;

/// Footer block the automation platform adds to preview HTML.
pub const DEFAULT_FOOTER_PATTERN: &str = r"(?is)<!--\s*footer\s*-->.*?<!--\s*/footer\s*-->";

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%([A-Za-z0-9_\-]+)%").expect("placeholder pattern is valid")
});

/// How a template's HTML is obtained.
#[derive(Debug, Clone)]
pub enum RenderStrategy {
    /// Preview HTML with the footer block removed.
    StrippedPreview { footer: Regex },
    /// `html` field of the JSON-encoded content, else the preview HTML.
    EmbeddedJson,
}

impl Default for RenderStrategy {
    fn default() -> Self {
        RenderStrategy::StrippedPreview {
            footer: Regex::new(DEFAULT_FOOTER_PATTERN).expect("default footer pattern is valid"),
        }
    }
}

impl RenderStrategy {
    /// `preview` (optionally with a footer regex) or `json`.
    pub fn from_config(name: &str, footer_pattern: Option<&str>) -> Result<Self, ConfigError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "preview" => {
                let pattern = footer_pattern.unwrap_or(DEFAULT_FOOTER_PATTERN);
                let footer = Regex::new(pattern).map_err(|e| ConfigError::InvalidValue {
                    key: "TEMPLATE_FOOTER_PATTERN".into(),
                    message: e.to_string(),
                })?;
                Ok(RenderStrategy::StrippedPreview { footer })
            }
            "json" => Ok(RenderStrategy::EmbeddedJson),
            other => Err(ConfigError::InvalidValue {
                key: "TEMPLATE_STRATEGY".into(),
                message: format!("unknown strategy '{other}' (expected 'preview' or 'json')"),
            }),
        }
    }

    /// Produce the HTML body for `template`. Never fails.
    pub fn render(&self, template: &Template) -> String {
        match self {
            RenderStrategy::StrippedPreview { footer } => {
                let stripped = footer.replace_all(&template.preview_content, "");
                if stripped.len() == template.preview_content.len() {
                    debug!(template_id = %template.id, "No footer block found in preview");
                }
                stripped.into_owned()
            }
            RenderStrategy::EmbeddedJson => embedded_html(template).unwrap_or_else(|| {
                debug!(template_id = %template.id, "Reverting to preview content");
                template.preview_content.clone()
            }),
        }
    }
}

fn embedded_html(template: &Template) -> Option<String> {
    let parsed: serde_json::Value = match serde_json::from_str(&template.content) {
        Ok(v) => v,
        Err(e) => {
            warn!(template_id = %template.id, error = %e, "Template content is not JSON");
            return None;
        }
    };
    parsed
        .get("html")
        .and_then(|h| h.as_str())
        .filter(|h| !h.is_empty())
        .map(str::to_string)
}

/// Per-recipient placeholder values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactVariables(BTreeMap<String, String>);

impl ContactVariables {
    /// Static attributes every contact has.
    pub fn basic(contact: &Contact) -> Self {
        let mut vars = Self::default();
        vars.insert("ID", &contact.id);
        vars.insert("EMAIL", &contact.email);
        vars.insert("FIRSTNAME", &contact.first_name);
        vars.insert("LASTNAME", &contact.last_name);
        vars.insert("PHONE", &contact.phone);
        vars
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Exact key first, then the first case-insensitive match.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .or_else(|| {
                self.0
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(name))
                    .map(|(_, v)| v)
            })
            .map(String::as_str)
    }
}

/// Replace every `%NAME%` placeholder from `vars`.
///
/// Unknown placeholders become empty strings and are logged.
pub fn substitute(content: &str, vars: &ContactVariables) -> String {
    let mut unresolved: Vec<String> = Vec::new();
    let output = PLACEHOLDER.replace_all(content, |caps: &regex::Captures<'_>| {
        match vars.lookup(&caps[1]) {
            Some(value) => value.to_string(),
            None => {
                unresolved.push(caps[0].to_string());
                String::new()
            }
        }
    });

    if !unresolved.is_empty() {
        unresolved.sort_unstable();
        unresolved.dedup();
        warn!(placeholders = ?unresolved, "Unresolved placeholders replaced with empty string");
    }
    output.into_owned()
}
