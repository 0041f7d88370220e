use crate::error::{FuseError, Result};
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_BASE_URL: &str = "https://api.together.xyz/v1";
pub const DEFAULT_MODEL: &str = "meta-llama/Meta-Llama-3.1-8B-Instruct-Turbo";

/// Credentials and endpoint for the completion service.
///
/// Read from an optional JSON file (`TOGETHER_AI`, `BASE_URL`, `MODEL` keys), then overridden by
/// `TOGETHER_API_KEY`, `LLM_BASE_URL` and `LLM_MODEL` from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(rename = "TOGETHER_AI", default)]
    pub api_key: Option<String>,
    #[serde(rename = "BASE_URL", default = "default_base_url")]
    pub base_url: String,
    #[serde(rename = "MODEL", default = "default_model")]
    pub model: String,
}

fn default_base_url() -> String { DEFAULT_BASE_URL.to_string() }
fn default_model() -> String { DEFAULT_MODEL.to_string() }

impl Default for ApiConfig {
    fn default() -> Self {
        Self { api_key: None, base_url: default_base_url(), model: default_model() }
    }
}

impl ApiConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(p) if p.exists() => {
                let text = std::fs::read_to_string(p)?;
                serde_json::from_str(&text).map_err(|e| FuseError::Config(format!("{}: {e}", p.display())))?
            }
            Some(p) => {
                tracing::warn!(path = %p.display(), "config file not found, using environment only");
                Self::default()
            }
            None => Self::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        Ok(cfg)
    }

    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, var: F) {
        if let Some(key) = var("TOGETHER_API_KEY").filter(|v| !v.is_empty()) { self.api_key = Some(key); }
        if let Some(url) = var("LLM_BASE_URL").filter(|v| !v.is_empty()) { self.base_url = url; }
        if let Some(model) = var("LLM_MODEL").filter(|v| !v.is_empty()) { self.model = model; }
    }

    pub fn require_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| FuseError::Config("TOGETHER_AI key not found in config or TOGETHER_API_KEY".into()))
    }
}
