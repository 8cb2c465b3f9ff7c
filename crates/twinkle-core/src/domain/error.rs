//! Domain-level error taxonomy for twinkle-eval.

use std::path::PathBuf;

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config field `{field}` is required")]
    MissingField { field: String },

    #[error("config field `{field}` is invalid: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("unknown evaluation method: {0}")]
    UnknownEvaluationMethod(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// twinkle-eval domain errors.
#[derive(Debug, thiserror::Error)]
pub enum TwinkleError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("unsupported dataset format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("dataset {} is malformed: {reason}", .path.display())]
    MalformedDataset { path: PathBuf, reason: String },

    #[error("model client error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    #[error("shard summary {} has no base config", .0.display())]
    MissingBaseConfig(PathBuf),

    #[error("shard log {} is corrupt at line {line}: {reason}", .path.display())]
    CorruptShard {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("no shards or final result found for timestamp {0}")]
    NothingToMerge(String),

    #[error("export error: {0}")]
    Export(String),

    #[error("invalid discovery pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for twinkle-eval domain operations.
pub type Result<T> = std::result::Result<T, TwinkleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = TwinkleError::from(ConfigError::MissingField {
            field: "model.name".to_string(),
        });
        assert!(err.to_string().contains("configuration error"));
        assert!(err.to_string().contains("model.name"));
    }

    #[test]
    fn test_corrupt_shard_error_mentions_path_and_line() {
        let err = TwinkleError::CorruptShard {
            path: PathBuf::from("results/eval_results_x_run0_node0.jsonl"),
            line: 7,
            reason: "expected value".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("eval_results_x_run0_node0.jsonl"));
        assert!(msg.contains("line 7"));
    }

    #[test]
    fn test_nothing_to_merge() {
        let err = TwinkleError::NothingToMerge("20260101_1200".to_string());
        assert!(err.to_string().contains("20260101_1200"));
    }
}
