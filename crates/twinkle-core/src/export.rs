//! Final report export: pretty JSON and a Markdown summary.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::domain::FinalReport;

pub const DEFAULT_FORMATS: &[&str] = &["json"];

pub trait ReportExporter: Send + Sync {
    /// Write `report` once per format as `{base_path}.{ext}`. Returns the
    /// written paths in format order.
    fn export(&self, report: &FinalReport, base_path: &Path, formats: &[&str]) -> Result<Vec<PathBuf>>;
}

/// Exporter writing `json` and `md` files next to each other.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileExporter;

impl ReportExporter for FileExporter {
    fn export(&self, report: &FinalReport, base_path: &Path, formats: &[&str]) -> Result<Vec<PathBuf>> {
        if let Some(parent) = base_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {:?}", parent))?;
        }
        let mut written = Vec::with_capacity(formats.len());
        for format in formats {
            let path = with_extension(base_path, format);
            match *format {
                "json" => write_report_json(&path, report)?,
                "md" => write_summary_md(&path, report)?,
                other => bail!("unsupported export format: {other}"),
            }
            written.push(path);
        }
        Ok(written)
    }
}

fn with_extension(base: &Path, ext: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// Write `results_{ts}.json` in pretty JSON format.
pub fn write_report_json(path: &Path, report: &FinalReport) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("serialize final report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render the Markdown summary table.
pub fn render_summary_md(report: &FinalReport) -> String {
    let mut out = String::new();
    out.push_str("# Evaluation Results\n\n");
    out.push_str(&format!(
        "- timestamp: {}\n- model: {}\n- duration: {:.1}s\n",
        report.timestamp,
        report.model_name(),
        report.duration_seconds
    ));

    for (name, dataset) in &report.dataset_results {
        out.push_str(&format!("\n## {}\n\n", name));
        out.push_str(&format!(
            "average accuracy: {:.4} (std {:.4})\n\n",
            dataset.average_accuracy, dataset.average_std
        ));
        out.push_str("| file | accuracy_mean | accuracy_std | runs |\n");
        out.push_str("|---|---|---|---|\n");
        for file in &dataset.results {
            out.push_str(&format!(
                "| {} | {:.4} | {:.4} | {} |\n",
                file.file_path,
                file.accuracy_mean,
                file.accuracy_std,
                file.individual_runs.accuracies.len()
            ));
        }
    }
    out
}

pub fn write_summary_md(path: &Path, report: &FinalReport) -> Result<()> {
    let md = render_summary_md(report);
    std::fs::write(path, md).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DatasetResult, FileResult};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn report() -> FinalReport {
        let file = FileResult::from_runs(
            "mmlu/anatomy.json",
            vec![0.5, 1.0],
            vec![
                "results/eval_results_20250101_1200_run0.jsonl".to_string(),
                "results/eval_results_20250101_1200_run1.jsonl".to_string(),
            ],
        );
        let mut datasets = BTreeMap::new();
        datasets.insert("datasets/mmlu".to_string(), DatasetResult::from_files(vec![file]));
        FinalReport::new(
            "20250101_1200",
            json!({"model": {"name": "tiny"}}),
            12.34,
            datasets,
        )
    }

    #[test]
    fn summary_markdown_render_is_stable() {
        let actual = render_summary_md(&report());
        let expected = "# Evaluation Results\n\n- timestamp: 20250101_1200\n- model: tiny\n- duration: 12.3s\n\n## datasets/mmlu\n\naverage accuracy: 0.7500 (std 0.2500)\n\n| file | accuracy_mean | accuracy_std | runs |\n|---|---|---|---|\n| mmlu/anatomy.json | 0.7500 | 0.2500 | 2 |\n";
        assert_eq!(actual, expected);
    }

    #[test]
    fn exports_json_and_md() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("results_20250101_1200");
        let written = FileExporter.export(&report(), &base, &["json", "md"]).unwrap();
        assert_eq!(
            written,
            vec![
                dir.path().join("results_20250101_1200.json"),
                dir.path().join("results_20250101_1200.md"),
            ]
        );

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&written[0]).unwrap()).unwrap();
        assert_eq!(raw["timestamp"], "20250101_1200");
        assert_eq!(
            raw["dataset_results"]["datasets/mmlu"]["results"][0]["individual_runs"]["accuracies"],
            json!([0.5, 1.0])
        );
    }

    #[test]
    fn unknown_format_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileExporter
            .export(&report(), &dir.path().join("r"), &["html"])
            .unwrap_err();
        assert!(err.to_string().contains("html"));
    }
}
