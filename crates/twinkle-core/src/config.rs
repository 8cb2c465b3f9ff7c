//! Evaluation configuration.
//!
//! Loaded once from YAML, validated at the boundary, then handed to the
//! engine as plain data. Defaults match the bundled template.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{ConfigError, Result};

/// Bundled starter config written by `twinkle-eval init`.
pub const CONFIG_TEMPLATE: &str = include_str!("../config.template.yaml");

/// Evaluation methods understood by [`crate::extractor::extractor_for`].
pub const EVALUATION_METHODS: &[&str] = &["pattern", "box"];

/// Outbound call pacing. `-1` in config means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum RateLimit {
    #[default]
    Unlimited,
    PerSecond(f64),
}

impl TryFrom<f64> for RateLimit {
    type Error = String;

    fn try_from(value: f64) -> std::result::Result<Self, Self::Error> {
        if value == -1.0 {
            Ok(RateLimit::Unlimited)
        } else if value.is_finite() && value > 0.0 {
            Ok(RateLimit::PerSecond(value))
        } else {
            Err(format!("api_rate_limit must be -1 or a positive number, got {value}"))
        }
    }
}

impl From<RateLimit> for f64 {
    fn from(limit: RateLimit) -> Self {
        match limit {
            RateLimit::Unlimited => -1.0,
            RateLimit::PerSecond(r) => r,
        }
    }
}

/// Delimiters of a reasoning segment embedded in model output.
///
/// With only an end tag, everything before the first end tag is reasoning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingTags {
    pub start: Option<String>,
    pub end: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmApiConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_rate_limit: RateLimit,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub frequency_penalty: f64,
    #[serde(default)]
    pub presence_penalty: f64,
    /// Extra request body fields forwarded verbatim.
    #[serde(default)]
    pub extra_body: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub thinking_start_tag: Option<String>,
    #[serde(default)]
    pub thinking_end_tag: Option<String>,
}

impl ModelConfig {
    /// Thinking delimiters, if an end tag is configured.
    pub fn thinking_tags(&self) -> Option<ThinkingTags> {
        let end = self.thinking_end_tag.as_ref().filter(|t| !t.is_empty())?;
        Some(ThinkingTags {
            start: self.thinking_start_tag.clone().filter(|t| !t.is_empty()),
            end: end.clone(),
        })
    }
}

/// One dataset path or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DatasetPaths {
    One(String),
    Many(Vec<String>),
}

impl DatasetPaths {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            DatasetPaths::One(p) => vec![p.clone()],
            DatasetPaths::Many(ps) => ps.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationConfig {
    pub dataset_paths: DatasetPaths,
    #[serde(default = "default_evaluation_method")]
    pub evaluation_method: String,
    #[serde(default = "default_repeat_runs")]
    pub repeat_runs: u32,
    #[serde(default)]
    pub shuffle_options: bool,
    /// Dataset path -> prompt language tag. Unlisted datasets use `zh`.
    #[serde(default)]
    pub datasets_prompt_map: BTreeMap<String, String>,
    /// Upper bound on in-flight model calls. Unbounded when absent.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// Top-level evaluation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    pub llm_api: LlmApiConfig,
    pub model: ModelConfig,
    pub evaluation: EvaluationConfig,
}

/// The slice of config the dispatcher consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchConfig {
    pub shuffle_options: bool,
    pub thinking: Option<ThinkingTags>,
    pub max_concurrency: Option<usize>,
}

impl EvalConfig {
    /// Read, parse, and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: EvalConfig = serde_yaml::from_str(raw).map_err(ConfigError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.llm_api.base_url.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "llm_api.base_url".to_string(),
            });
        }
        if self.model.name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "model.name".to_string(),
            });
        }
        let paths = self.evaluation.dataset_paths.to_vec();
        if paths.is_empty() || paths.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::InvalidField {
                field: "evaluation.dataset_paths".to_string(),
                reason: "must list at least one non-empty path".to_string(),
            });
        }
        if self.evaluation.repeat_runs == 0 {
            return Err(ConfigError::InvalidField {
                field: "evaluation.repeat_runs".to_string(),
                reason: "must be a positive integer".to_string(),
            });
        }
        if self.evaluation.max_concurrency == Some(0) {
            return Err(ConfigError::InvalidField {
                field: "evaluation.max_concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !EVALUATION_METHODS.contains(&self.evaluation.evaluation_method.as_str()) {
            return Err(ConfigError::UnknownEvaluationMethod(
                self.evaluation.evaluation_method.clone(),
            ));
        }
        if self.model.thinking_start_tag.is_some() && self.model.thinking_end_tag.is_none() {
            return Err(ConfigError::InvalidField {
                field: "model.thinking_start_tag".to_string(),
                reason: "requires model.thinking_end_tag".to_string(),
            });
        }
        Ok(())
    }

    /// JSON snapshot for reports, with the API key removed.
    pub fn snapshot(&self) -> serde_json::Value {
        let mut redacted = self.clone();
        redacted.llm_api.api_key = None;
        serde_json::to_value(&redacted).unwrap_or(serde_json::Value::Null)
    }

    /// Prompt language for a dataset path.
    pub fn language_for(&self, dataset_path: &str) -> &str {
        self.evaluation
            .datasets_prompt_map
            .get(dataset_path)
            .map(String::as_str)
            .unwrap_or("zh")
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            shuffle_options: self.evaluation.shuffle_options,
            thinking: self.model.thinking_tags(),
            max_concurrency: self.evaluation.max_concurrency,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout() -> u64 {
    600
}

fn default_top_p() -> f64 {
    0.9
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_evaluation_method() -> String {
    "pattern".to_string()
}

fn default_repeat_runs() -> u32 {
    1
}
