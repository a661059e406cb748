//! Configuration loading with env-var overrides.
//!
//! Reads one TOML file (`GATEWAY_CONFIG`, else `config/default.toml`) and
//! applies `GATEWAY_*` overrides on top. [`Config::validate`] runs before
//! the server starts; a missing endpoint or model id is fatal.

use std::env;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::doc_processor::{DocumentLimits, DEFAULT_MAX_CHARS, DEFAULT_TRUNCATION_MARKER};
use crate::error::GatewayError;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub bind: String,
    pub log_level: String,
    pub max_upload_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5080".to_string(),
            log_level: "info".to_string(),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum BackendKind {
    #[default]
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub endpoint: String,
    pub text_model: String,
    pub vision_model: String,
    pub connect_timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Ollama,
            endpoint: String::new(),
            text_model: String::new(),
            vision_model: String::new(),
            connect_timeout_secs: 10,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentsConfig {
    pub max_chars_per_document: usize,
    pub truncation_marker: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            max_chars_per_document: DEFAULT_MAX_CHARS,
            truncation_marker: DEFAULT_TRUNCATION_MARKER.to_string(),
        }
    }
}

impl DocumentsConfig {
    pub fn limits(&self) -> DocumentLimits {
        DocumentLimits {
            max_chars: self.max_chars_per_document,
            truncation_marker: self.truncation_marker.clone(),
        }
    }
}

/// Load config from `config_path`, `$GATEWAY_CONFIG`, or `config/default.toml`,
/// then apply env-var overrides. Without any file the config comes from the
/// environment alone.
pub fn load(config_path: Option<&str>) -> Result<Config, GatewayError> {
    let path = config_path
        .map(str::to_string)
        .or_else(|| env::var("GATEWAY_CONFIG").ok());

    let raw = match path {
        Some(path) => read(Path::new(&path))?,
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => read(Path::new(DEFAULT_CONFIG_PATH))?,
        None => String::new(),
    };

    Config::from_toml(&raw, |key| env::var(key).ok())
}

fn read(path: &Path) -> Result<String, GatewayError> {
    fs::read_to_string(path)
        .map_err(|e| GatewayError::Config(format!("cannot read {}: {e}", path.display())))
}

impl Config {
    /// Parse TOML and apply overrides from `lookup` (normally the process env).
    pub fn from_toml<F>(raw: &str, lookup: F) -> Result<Self, GatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config: Config =
            toml::from_str(raw).map_err(|e| GatewayError::Config(format!("parse error: {e}")))?;

        if let Some(v) = lookup("GATEWAY_BIND") {
            config.gateway.bind = v;
        }
        if let Some(v) = lookup("GATEWAY_LOG_LEVEL") {
            config.gateway.log_level = v;
        }
        if let Some(v) = lookup("GATEWAY_ENDPOINT") {
            config.backend.endpoint = v;
        }
        if let Some(v) = lookup("GATEWAY_TEXT_MODEL") {
            config.backend.text_model = v;
        }
        if let Some(v) = lookup("GATEWAY_VISION_MODEL") {
            config.backend.vision_model = v;
        }
        if let Some(v) = lookup("GATEWAY_MAX_DOC_CHARS") {
            config.documents.max_chars_per_document = v.parse().map_err(|_| {
                GatewayError::Config(format!("GATEWAY_MAX_DOC_CHARS is not a number: '{v}'"))
            })?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        let required = [
            ("backend.endpoint", &self.backend.endpoint),
            ("backend.text_model", &self.backend.text_model),
            ("backend.vision_model", &self.backend.vision_model),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(GatewayError::Config(format!("{key} must be set")));
            }
        }
        if !self.backend.endpoint.starts_with("http://") && !self.backend.endpoint.starts_with("https://") {
            return Err(GatewayError::Config(format!(
                "backend.endpoint must be an http(s) URL, got '{}'",
                self.backend.endpoint
            )));
        }
        if self.documents.max_chars_per_document == 0 {
            return Err(GatewayError::Config(
                "documents.max_chars_per_document must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[gateway]
bind = "0.0.0.0:9000"

[backend]
endpoint = "http://localhost:11434"
text_model = "phi3:3.8b"
vision_model = "llava:7b"
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_parse_with_defaults() {
        let config = Config::from_toml(SAMPLE, no_env).unwrap();
        assert_eq!(config.gateway.bind, "0.0.0.0:9000");
        assert_eq!(config.gateway.log_level, "info");
        assert_eq!(config.backend.kind, BackendKind::Ollama);
        assert_eq!(config.backend.connect_timeout_secs, 10);
        assert_eq!(config.documents.max_chars_per_document, 12_000);
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_toml(SAMPLE, |key| match key {
            "GATEWAY_TEXT_MODEL" => Some("qwen2.5".into()),
            "GATEWAY_MAX_DOC_CHARS" => Some("500".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.backend.text_model, "qwen2.5");
        assert_eq!(config.documents.limits().max_chars, 500);
    }

    #[test]
    fn test_bad_number_override() {
        let err = Config::from_toml(SAMPLE, |key| {
            (key == "GATEWAY_MAX_DOC_CHARS").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }

    #[test]
    fn test_missing_models_are_fatal() {
        let config = Config::from_toml("[backend]\nendpoint = \"http://x\"\ntext_model = \"phi3\"", no_env).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("vision_model"));
    }

    #[test]
    fn test_unknown_backend_kind() {
        let err = Config::from_toml("[backend]\nkind = \"tgi\"", no_env).unwrap_err();
        assert!(err.to_string().contains("parse error"));
    }

    #[test]
    fn test_openai_kind() {
        let config = Config::from_toml("[backend]\nkind = \"openai\"", no_env).unwrap();
        assert_eq!(config.backend.kind, BackendKind::OpenAi);
    }

    #[test]
    fn test_endpoint_must_be_url() {
        let config = Config::from_toml(SAMPLE, |key| {
            (key == "GATEWAY_ENDPOINT").then(|| "localhost:11434".to_string())
        })
        .unwrap();
        assert!(config.validate().is_err());
    }
}
