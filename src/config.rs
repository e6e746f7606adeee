//! Configuration loader and validator for the support hub.
use crate::model::Brand;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("missing required configuration values: {0}")]
    Missing(String),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub zendesk: Zendesk,
    pub openai: OpenAi,
    pub slack: Slack,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
}

/// Zendesk API credentials and brand id mappings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Zendesk {
    pub subdomain: String,
    pub email: String,
    pub api_token: String,
    #[serde(default)]
    pub brands: BrandIds,
}

/// Numeric Zendesk brand ids mapped to product lines. Tickets carrying an
/// unmapped (or absent) brand id classify as `unknown`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrandIds {
    pub omni_one: Option<i64>,
    pub omni_arena: Option<i64>,
}

impl BrandIds {
    pub fn classify(&self, brand_id: Option<i64>) -> Brand {
        match brand_id {
            Some(id) if self.omni_one == Some(id) => Brand::OmniOne,
            Some(id) if self.omni_arena == Some(id) => Brand::OmniArena,
            _ => Brand::Unknown,
        }
    }
}

/// Completion API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OpenAi {
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

/// Slack webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Slack {
    pub webhook_url: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance. Collects every missing required value
/// into a single error so a misconfigured deployment fails fast exactly once.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let mut missing: Vec<&'static str> = Vec::new();

    if cfg.app.data_dir.trim().is_empty() {
        missing.push("app.data_dir");
    }
    if cfg.zendesk.subdomain.trim().is_empty() {
        missing.push("zendesk.subdomain");
    }
    if cfg.zendesk.email.trim().is_empty() {
        missing.push("zendesk.email");
    }
    if cfg.zendesk.api_token.trim().is_empty() {
        missing.push("zendesk.api_token");
    }
    if cfg.openai.api_key.trim().is_empty() {
        missing.push("openai.api_key");
    }
    if cfg.openai.model.trim().is_empty() {
        missing.push("openai.model");
    }
    if cfg.slack.webhook_url.trim().is_empty() {
        missing.push("slack.webhook_url");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Missing(missing.join(", ")))
    }
}

/// Example configuration shipped with the repository.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"

zendesk:
  subdomain: "yourcompany"
  email: "ops@yourcompany.com"
  api_token: "YOUR_ZENDESK_API_TOKEN"
  brands:
    omni_one: 360000000001
    omni_arena: 360000000002

openai:
  api_key: "YOUR_OPENAI_API_KEY"
  model: "gpt-4o-mini"

slack:
  webhook_url: "https://hooks.slack.com/services/T000/B000/XXXX"
"#
}
