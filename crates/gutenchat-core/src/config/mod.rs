//! Editor settings resolution.
//!
//! The host page injects a settings blob before the assistant loads:
//! `{ nonce, restUrl, homeUrl, currentUser }`. This module models that
//! injection point as a [`SettingsSource`] and resolves it into typed
//! [`EditorSettings`].
//!
//! Resolution never fails: an absent or malformed blob yields the inert
//! default (empty nonce, empty REST URL). Calls made with inert settings
//! are expected to fail at the transport layer with a network/auth error,
//! not a client-side panic.

use serde::Deserialize;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Environment variable holding the settings blob as a JSON string.
pub const SETTINGS_ENV_VAR: &str = "GUTENCHAT_SETTINGS";

/// Connection parameters for the chat endpoint, as injected by the host.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EditorSettings {
    /// REST nonce sent as `X-WP-Nonce` on every request.
    pub nonce: String,
    /// REST base URL, trailing slash included (e.g. `https://site/wp-json/assistant/v1/`).
    pub rest_url: String,
    /// Public URL of the site being edited.
    pub home_url: String,
    /// Ambient user context, passed through untyped.
    pub current_user: serde_json::Value,
}

impl EditorSettings {
    /// The chat completions endpoint: the REST base with `ai` appended.
    pub fn endpoint_url(&self) -> String {
        format!("{}ai", self.rest_url)
    }

    /// True when no blob was found and the inert fallback is in effect.
    pub fn is_inert(&self) -> bool {
        self.nonce.is_empty() && self.rest_url.is_empty()
    }
}

/// The single external injection point for the settings blob.
pub trait SettingsSource: Send + Sync {
    /// Read the raw blob, if one is present.
    fn load(&self) -> Option<serde_json::Value>;
}

/// Ambient source: `GUTENCHAT_SETTINGS` in the environment, else the
/// settings file at `~/.gutenchat/settings.json`.
#[derive(Debug, Default)]
pub struct AmbientSource;

impl SettingsSource for AmbientSource {
    fn load(&self) -> Option<serde_json::Value> {
        if let Ok(raw) = std::env::var(SETTINGS_ENV_VAR) {
            match serde_json::from_str(&raw) {
                Ok(value) => return Some(value),
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed {} value", SETTINGS_ENV_VAR);
                    return None;
                }
            }
        }

        let path = settings_path();
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring malformed settings file");
                None
            }
        }
    }
}

/// Fixed in-memory blob, for embedding and tests.
#[derive(Debug)]
pub struct InlineSource(pub serde_json::Value);

impl SettingsSource for InlineSource {
    fn load(&self) -> Option<serde_json::Value> {
        Some(self.0.clone())
    }
}

/// Resolve a source into typed settings, falling back to the inert default.
pub fn resolve(source: &dyn SettingsSource) -> EditorSettings {
    let Some(blob) = source.load() else {
        debug!("No editor settings found, using inert defaults");
        return EditorSettings::default();
    };

    match serde_json::from_value(blob) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(error = %e, "Editor settings blob has unexpected shape, using inert defaults");
            EditorSettings::default()
        }
    }
}

/// Default settings file path (`~/.gutenchat/settings.json`).
pub fn settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gutenchat")
        .join("settings.json")
}

/// Write a starter settings file for the CLI's `onboard` command.
pub fn write_default_template() -> std::io::Result<PathBuf> {
    let path = settings_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let template = serde_json::json!({
        "nonce": "PASTE_REST_NONCE_HERE",
        "restUrl": "https://example.com/wp-json/assistant/v1/",
        "homeUrl": "https://example.com",
        "currentUser": { "name": "admin" }
    });

    let rendered = serde_json::to_string_pretty(&template).map_err(std::io::Error::other)?;
    std::fs::write(&path, rendered)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_camel_case_blob() {
        let source = InlineSource(serde_json::json!({
            "nonce": "abc123",
            "restUrl": "https://site/wp-json/assistant/v1/",
            "homeUrl": "https://site",
            "currentUser": { "name": "ed" }
        }));
        let settings = resolve(&source);
        assert_eq!(settings.nonce, "abc123");
        assert_eq!(settings.rest_url, "https://site/wp-json/assistant/v1/");
        assert_eq!(settings.current_user["name"], "ed");
        assert!(!settings.is_inert());
    }

    #[test]
    fn test_endpoint_url_appends_ai() {
        let settings = EditorSettings {
            rest_url: "https://site/wp-json/assistant/v1/".into(),
            ..Default::default()
        };
        assert_eq!(settings.endpoint_url(), "https://site/wp-json/assistant/v1/ai");
    }

    #[test]
    fn test_absent_blob_is_inert_not_an_error() {
        struct Empty;
        impl SettingsSource for Empty {
            fn load(&self) -> Option<serde_json::Value> {
                None
            }
        }
        let settings = resolve(&Empty);
        assert!(settings.is_inert());
        assert_eq!(settings.endpoint_url(), "ai");
    }

    #[test]
    fn test_partial_blob_fills_defaults() {
        let source = InlineSource(serde_json::json!({ "nonce": "only-nonce" }));
        let settings = resolve(&source);
        assert_eq!(settings.nonce, "only-nonce");
        assert_eq!(settings.rest_url, "");
    }

    #[test]
    fn test_wrong_shape_falls_back_to_inert() {
        let source = InlineSource(serde_json::json!(["not", "an", "object"]));
        let settings = resolve(&source);
        assert!(settings.is_inert());
    }
}
