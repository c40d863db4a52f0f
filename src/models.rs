//! Raw master records as served by the upstream system.
//!
//! Field names follow the upstream wire format (camelCase). Every field is
//! optional on the wire and defaults to the empty string; codes and keys that
//! arrive as JSON numbers are kept as their decimal text.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::cache::CacheKey;
use crate::error::{HarnessError, Result};

/// Top of the organization hierarchy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Division {
    #[serde(deserialize_with = "lenient_string")]
    pub division_code: String,
    #[serde(deserialize_with = "lenient_string")]
    pub division_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub division_short_name: String,
}

/// Belongs to exactly one [`Division`] through `division_code`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Department {
    #[serde(deserialize_with = "lenient_string")]
    pub department_code: String,
    #[serde(deserialize_with = "lenient_string")]
    pub department_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub department_short_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub division_code: String,
}

/// Belongs to exactly one [`Department`] through `department_code`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Group {
    #[serde(deserialize_with = "lenient_string")]
    pub group_code: String,
    #[serde(deserialize_with = "lenient_string")]
    pub group_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub group_short_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub department_code: String,
}

/// An employee. `group_short_name` is a denormalized link, never checked.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    #[serde(deserialize_with = "lenient_string")]
    pub user_key: String,
    #[serde(deserialize_with = "lenient_string")]
    pub user_id: String,
    #[serde(deserialize_with = "lenient_string")]
    pub user_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub mail_address: String,
    #[serde(deserialize_with = "lenient_string")]
    pub group_short_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub position: String,
    #[serde(deserialize_with = "lenient_string")]
    pub joining_date: String,
}

/// Accepts strings, numbers, booleans and null.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_text(&value))
}

/// Text form of a scalar JSON value; `null` becomes the empty string.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Decodes the record list a master-table blob carries under `data`.
pub fn table_rows<T>(key: &CacheKey, blob: Value) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    let rows = match blob {
        Value::Object(mut map) => map.remove("data"),
        _ => None,
    };
    match rows {
        Some(rows @ Value::Array(_)) => serde_json::from_value(rows)
            .map_err(|e| HarnessError::corrupt(key.to_string(), e.to_string())),
        Some(_) => Err(HarnessError::corrupt(key.to_string(), "data is not an array")),
        None => Err(HarnessError::corrupt(key.to_string(), "missing data field")),
    }
}
