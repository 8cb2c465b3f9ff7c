//! Result summaries: per file, per dataset, and the final report.
//!
//! These are always derived from answer records (or, for legacy shards,
//! from pre-computed accuracies) and never edited by hand.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Arithmetic mean, `0.0` for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation, `0.0` for fewer than two values.
pub fn population_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Per-run accuracies and the run logs they were computed from, in run order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndividualRuns {
    #[serde(default)]
    pub accuracies: Vec<f64>,
    #[serde(rename = "results", default)]
    pub shard_paths: Vec<String>,
}

/// Summary for one question file across repeat runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    #[serde(rename = "file")]
    pub file_path: String,
    #[serde(default)]
    pub accuracy_mean: f64,
    #[serde(default)]
    pub accuracy_std: f64,
    #[serde(default)]
    pub individual_runs: IndividualRuns,
}

impl FileResult {
    /// Build a file summary from per-run accuracies in run-index order.
    pub fn from_runs(file_path: impl Into<String>, accuracies: Vec<f64>, shard_paths: Vec<String>) -> Self {
        Self {
            file_path: file_path.into(),
            accuracy_mean: mean(&accuracies),
            accuracy_std: population_std(&accuracies),
            individual_runs: IndividualRuns {
                accuracies,
                shard_paths,
            },
        }
    }
}

/// Files that share a dataset root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetResult {
    #[serde(default)]
    pub results: Vec<FileResult>,
    /// Unweighted mean of the files' `accuracy_mean`.
    #[serde(default)]
    pub average_accuracy: f64,
    /// Unweighted mean of the files' `accuracy_std`.
    #[serde(default)]
    pub average_std: f64,
}

impl DatasetResult {
    pub fn from_files(results: Vec<FileResult>) -> Self {
        let means: Vec<f64> = results.iter().map(|r| r.accuracy_mean).collect();
        let stds: Vec<f64> = results.iter().map(|r| r.accuracy_std).collect();
        Self {
            average_accuracy: mean(&means),
            average_std: mean(&stds),
            results,
        }
    }

    /// Look up a file summary by path.
    pub fn file(&self, file_path: &str) -> Option<&FileResult> {
        self.results.iter().find(|r| r.file_path == file_path)
    }
}

/// The result of one evaluation (or one merge). Also the shape of the
/// per-node/rank summary document written by distributed runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalReport {
    pub timestamp: String,
    /// Config snapshot with credentials removed. `Null` when absent.
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub duration_seconds: f64,
    #[serde(default)]
    pub dataset_results: BTreeMap<String, DatasetResult>,
}

impl FinalReport {
    pub fn new(
        timestamp: impl Into<String>,
        config: serde_json::Value,
        duration_seconds: f64,
        dataset_results: BTreeMap<String, DatasetResult>,
    ) -> Self {
        Self {
            timestamp: timestamp.into(),
            config,
            duration_seconds,
            dataset_results,
        }
    }

    /// Model name recorded in the config snapshot.
    pub fn model_name(&self) -> &str {
        self.config
            .pointer("/model/name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown_model")
    }
}
