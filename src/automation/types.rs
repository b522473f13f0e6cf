//! Automation platform objects, reduced to the fields the pipelines read.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Automation {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Template {
    #[serde(default, deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub name: String,
    #[serde(default)]
    pub subject: Option<String>,
    /// Stored editor content; JSON for designer templates, HTML otherwise.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    /// Rendered HTML preview.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub preview_content: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Contact {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub email: String,
    #[serde(rename = "firstName", default, deserialize_with = "null_as_empty")]
    pub first_name: String,
    #[serde(rename = "lastName", default, deserialize_with = "null_as_empty")]
    pub last_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub phone: String,
}

/// A contact's pass through an automation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ContactRun {
    #[serde(deserialize_with = "id_string")]
    pub contact: String,
    #[serde(default, deserialize_with = "id_string")]
    pub seriesid: String,
    /// Whether the contact has finished the automation.
    #[serde(default, deserialize_with = "flag")]
    pub completed: bool,
}

/// A custom contact field.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Field {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    /// Personalization tag used in `%TAG%` placeholders.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub perstag: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldValue {
    #[serde(deserialize_with = "id_string")]
    pub field: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Ids arrive as strings or numbers depending on the endpoint.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Blank attributes come back as `null`.
fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// `"1"`, `1` and `true` are all set.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().is_some_and(|v| v != 0),
        Value::String(s) => matches!(s.trim(), "1" | "true"),
        _ => false,
    })
}
