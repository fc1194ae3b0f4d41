// src/config.rs

use serde::Deserialize;
use std::{fs, io::ErrorKind, path::Path, time::Duration};
use toml_edit::{DocumentMut, value};

use crate::error::ConfigError;
use crate::heuristics::rules::{RuleSpec, RuleTable};
use crate::heuristics::totals::ReviewTolerances;

pub const DEFAULT_CONFIG_PATH: &str = ".config/receipt_split.toml";

#[derive(Debug, Clone, Copy)]
enum KeyType {
    Text,
    Integer,
    Float,
    Bool,
}

/// Keys `set_value` is allowed to touch.
const EDITABLE_KEYS: &[(&str, KeyType)] = &[
    ("db_path", KeyType::Text),
    ("review.subtotal_abs_tolerance", KeyType::Float),
    ("review.subtotal_rel_tolerance", KeyType::Float),
    ("review.grand_total_abs_tolerance", KeyType::Float),
    ("review.grand_total_rel_tolerance", KeyType::Float),
    ("review.max_unresolved_lines", KeyType::Integer),
    ("review.min_line_confidence", KeyType::Float),
    ("extraction.timeout_secs", KeyType::Integer),
    ("credentials.pepper", KeyType::Text),
    ("classifier.replace_defaults", KeyType::Bool),
    ("fallback.backend", KeyType::Text),
    ("fallback.ollama.base_url", KeyType::Text),
    ("fallback.ollama.model", KeyType::Text),
    ("fallback.remote.base_url", KeyType::Text),
    ("fallback.remote.model", KeyType::Text),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub db_path: String,
    pub review: ReviewTolerances,
    pub extraction: ExtractionConfig,
    pub credentials: CredentialsConfig,
    pub classifier: ClassifierConfig,
    pub fallback: FallbackConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            review: ReviewTolerances::default(),
            extraction: ExtractionConfig::default(),
            credentials: CredentialsConfig::default(),
            classifier: ClassifierConfig::default(),
            fallback: FallbackConfig::default(),
        }
    }
}

fn default_db_path() -> String {
    "lobbystore/lobbies.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub timeout_secs: u64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { timeout_secs: 12 }
    }
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub pepper: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub replace_defaults: bool,
    pub rules: Vec<RuleSpec>,
}

impl ClassifierConfig {
    pub fn rule_table(&self) -> Result<RuleTable, ConfigError> {
        RuleTable::with_overrides(&self.rules, self.replace_defaults)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackBackend {
    #[default]
    Disabled,
    Ollama,
    Remote,
}

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434/v1";
const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5:7b";
const DEFAULT_REMOTE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_REMOTE_MODEL: &str = "gpt-4o-mini";

/// An OpenAI-compatible endpoint. Empty fields fall back to the backend defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub model: String,
}

impl EndpointConfig {
    fn filled(&self, base_url: &str, model: &str) -> Self {
        let pick = |set: &str, fallback: &str| {
            if set.trim().is_empty() {
                fallback.to_string()
            } else {
                set.trim().trim_end_matches('/').to_string()
            }
        };
        Self {
            base_url: pick(&self.base_url, base_url),
            model: pick(&self.model, model),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub backend: FallbackBackend,
    pub ollama: EndpointConfig,
    pub remote: EndpointConfig,
}

impl FallbackConfig {
    pub fn ollama_endpoint(&self) -> EndpointConfig {
        self.ollama.filled(DEFAULT_OLLAMA_URL, DEFAULT_OLLAMA_MODEL)
    }

    pub fn remote_endpoint(&self) -> EndpointConfig {
        self.remote.filled(DEFAULT_REMOTE_URL, DEFAULT_REMOTE_MODEL)
    }
}

impl Config {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml_str(&content),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Set one dotted key in place, keeping the rest of the file (and its
    /// comments) untouched. The result must still load.
    pub fn set_value(path: impl AsRef<Path>, key: &str, raw: &str) -> Result<(), ConfigError> {
        let Some((_, kind)) = EDITABLE_KEYS.iter().find(|(k, _)| *k == key) else {
            return Err(ConfigError::UnknownKey(key.to_string()));
        };
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        };
        let new_value = match kind {
            KeyType::Text => value(raw),
            KeyType::Integer => value(raw.trim().parse::<i64>().map_err(|_| invalid())?),
            KeyType::Float => value(raw.trim().parse::<f64>().map_err(|_| invalid())?),
            KeyType::Bool => value(raw.trim().parse::<bool>().map_err(|_| invalid())?),
        };

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        let mut doc = content.parse::<DocumentMut>()?;

        let parts: Vec<&str> = key.split('.').collect();
        match parts.as_slice() {
            [k] => doc[*k] = new_value,
            [t, k] => doc[*t][*k] = new_value,
            [t, s, k] => doc[*t][*s][*k] = new_value,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }

        let rendered = doc.to_string();
        Self::from_toml_str(&rendered)?;

        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, rendered)?;
        Ok(())
    }
}
