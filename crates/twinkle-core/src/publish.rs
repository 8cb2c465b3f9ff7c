//! Publishing finished results to a shared location.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::shard::final_report_path;

pub trait ResultPublisher: Send + Sync {
    /// Publish the final report and merged run logs of `timestamp`.
    fn publish(&self, model_name: &str, results_dir: &Path, timestamp: &str) -> Result<Vec<PathBuf>>;
}

/// Copies results into `{root}/results/{model}/{variant}/`.
#[derive(Debug, Clone)]
pub struct DirectoryPublisher {
    root: PathBuf,
    variant: String,
}

impl DirectoryPublisher {
    pub fn new(root: impl Into<PathBuf>, variant: Option<&str>) -> Self {
        Self {
            root: root.into(),
            variant: safe_variant(variant.unwrap_or("default")),
        }
    }

    pub fn target_dir(&self, model_name: &str) -> PathBuf {
        self.root
            .join("results")
            .join(model_name.replace('/', "__"))
            .join(&self.variant)
    }
}

fn safe_variant(variant: &str) -> String {
    let v = variant
        .trim()
        .replace(['/', '\\'], "_")
        .replace("..", "_");
    if v.is_empty() {
        "default".to_string()
    } else {
        v
    }
}

/// Final report plus merged run logs (`eval_results_{ts}_run{r}.jsonl`) that
/// exist in `results_dir`. Node-suffixed shard logs are not included.
pub fn publishable_files(results_dir: &Path, timestamp: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let report = final_report_path(results_dir, timestamp);
    if report.is_file() {
        files.push(report);
    }

    let prefix = format!("eval_results_{timestamp}_run");
    let mut runs = Vec::new();
    if results_dir.is_dir() {
        for entry in fs::read_dir(results_dir).with_context(|| format!("read {:?}", results_dir))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_merged_log = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".jsonl"))
                .is_some_and(|run| !run.is_empty() && run.bytes().all(|b| b.is_ascii_digit()));
            if is_merged_log {
                runs.push(entry.path());
            }
        }
    }
    runs.sort();
    files.extend(runs);
    Ok(files)
}

impl ResultPublisher for DirectoryPublisher {
    fn publish(&self, model_name: &str, results_dir: &Path, timestamp: &str) -> Result<Vec<PathBuf>> {
        let files = publishable_files(results_dir, timestamp)?;
        if files.is_empty() {
            info!(timestamp = %timestamp, "nothing to publish");
            return Ok(Vec::new());
        }

        let target = self.target_dir(model_name);
        fs::create_dir_all(&target).with_context(|| format!("create {:?}", target))?;

        let mut published = Vec::with_capacity(files.len());
        for src in files {
            let Some(name) = src.file_name() else {
                continue;
            };
            let dst = target.join(name);
            fs::copy(&src, &dst).with_context(|| format!("copy {:?} -> {:?}", src, dst))?;
            published.push(dst);
        }
        info!(target = %target.display(), files = published.len(), "results published");
        Ok(published)
    }
}
