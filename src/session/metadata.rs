//! Typed views of the `initialize` response.
//!
//! Missing fields fall back to their defaults; unknown fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// A slash command the agent supports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SlashCommand {
    /// Command name without the leading slash.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Hint for the command's arguments.
    pub argument_hint: String,
}

/// A model the agent can switch to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelInfo {
    /// Identifier passed to `set_model`.
    pub value: String,
    /// Display name.
    pub display_name: String,
    /// Description.
    pub description: String,
}

/// Account the agent is authenticated as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AccountInfo {
    /// Account e-mail.
    pub email: Option<String>,
    /// Organisation name.
    pub organization: Option<String>,
    /// Subscription tier.
    pub subscription_type: Option<String>,
    /// Where the auth token came from.
    pub token_source: Option<String>,
    /// Where the API key came from.
    pub api_key_source: Option<String>,
}

/// Current and available output styles.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputStyles {
    /// Active style.
    pub current: Option<String>,
    /// Every selectable style.
    pub available: Vec<String>,
}

/// Deserialize `field` of `init`, defaulting when absent or null.
///
/// # Errors
///
/// Returns `AppError::Protocol` if the field is present with the wrong shape.
pub(crate) fn field<T>(init: &Value, key: &str) -> Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    match init.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
            crate::AppError::Protocol(format!("invalid initialize field `{key}`: {e}"))
        }),
    }
}

pub(crate) fn output_styles(init: &Value) -> Result<OutputStyles> {
    Ok(OutputStyles {
        current: field(init, "output_style")?,
        available: field(init, "available_output_styles")?,
    })
}
