//! Distributed merge: shard logs and per-rank summaries into one final report.
//!
//! Stages:
//! 1. discovery: index every summary's dataset / file / run / shard path
//! 2. per-run merge: concatenate a run's shard logs, sort by question id
//! 3. per-file recomputation from the merged logs (after all stage 2 writes)
//! 4. assembly of file, dataset, and report summaries
//!
//! [`merge_shards`] takes the summaries as data. Only [`finalize`] touches
//! the results directory to discover them, and only it deletes inputs, after
//! the final report has been exported.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::domain::{mean, DatasetResult, FileResult, FinalReport, Result, TwinkleError};
use crate::export::{ReportExporter, DEFAULT_FORMATS};
use crate::metrics::METRICS;
use crate::obs;
use crate::publish::ResultPublisher;
use crate::shard::{final_report_path, merged_run_path, summary_glob};
use crate::store::ShardStore;

/// One per-node/rank summary document and where it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardSummary {
    pub path: PathBuf,
    pub report: FinalReport,
}

impl ShardSummary {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path)?;
        let report = serde_json::from_str(&raw)?;
        Ok(Self { path, report })
    }
}

/// Stage 1 output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeIndex {
    /// Run index -> shard logs of that run, deduplicated, first-seen order.
    pub run_shards: BTreeMap<u32, Vec<PathBuf>>,
    /// Dataset -> files in first-seen order, each with its run indices.
    pub dataset_files: BTreeMap<String, Vec<(String, BTreeSet<u32>)>>,
}

impl MergeIndex {
    pub fn shard_count(&self) -> usize {
        self.run_shards.values().map(Vec::len).sum()
    }
}

/// Build the discovery index. A file's run index is the position of the shard
/// path in its `individual_runs.results` list.
pub fn build_index(summaries: &[ShardSummary]) -> MergeIndex {
    let mut index = MergeIndex::default();
    for summary in summaries {
        for (dataset, result) in &summary.report.dataset_results {
            let files = index.dataset_files.entry(dataset.clone()).or_default();
            for file in &result.results {
                let pos = match files.iter().position(|(f, _)| *f == file.file_path) {
                    Some(pos) => pos,
                    None => {
                        files.push((file.file_path.clone(), BTreeSet::new()));
                        files.len() - 1
                    }
                };
                for (run, shard) in file.individual_runs.shard_paths.iter().enumerate() {
                    let run = run as u32;
                    files[pos].1.insert(run);
                    let shards = index.run_shards.entry(run).or_default();
                    let shard = PathBuf::from(shard);
                    if !shards.contains(&shard) {
                        shards.push(shard);
                    }
                }
            }
        }
    }
    index
}

/// Mean of the accuracies the summaries declare for exactly this dataset,
/// file, and run. `0.0` when none declare one.
fn declared_accuracy(summaries: &[ShardSummary], dataset: &str, file: &str, run: u32) -> f64 {
    let declared: Vec<f64> = summaries
        .iter()
        .filter_map(|s| s.report.dataset_results.get(dataset))
        .flat_map(|d| d.results.iter())
        .filter(|f| f.file_path == file)
        .filter_map(|f| f.individual_runs.accuracies.get(run as usize).copied())
        .collect();
    mean(&declared)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub report: FinalReport,
    /// Merged log per run index.
    pub merged_logs: BTreeMap<u32, PathBuf>,
    /// Shard logs that existed and were read; deleted after export.
    pub consumed_shards: Vec<PathBuf>,
}

/// Merge shard logs described by `summaries` and assemble the final report.
///
/// Writes `eval_results_{timestamp}_run{r}.jsonl` for every run through
/// `store`; deletes nothing.
#[instrument(skip(summaries, store), fields(summaries = summaries.len()))]
pub fn merge_shards(
    timestamp: &str,
    summaries: &[ShardSummary],
    store: &dyn ShardStore,
    results_dir: &Path,
) -> Result<MergeOutcome> {
    let base = summaries
        .first()
        .ok_or_else(|| TwinkleError::NothingToMerge(timestamp.to_string()))?;
    if base.report.config.is_null() {
        return Err(TwinkleError::MissingBaseConfig(base.path.clone()));
    }

    let index = build_index(summaries);

    let mut merged_logs = BTreeMap::new();
    let mut consumed_shards = Vec::new();
    for (run, shards) in &index.run_shards {
        let mut records = Vec::new();
        for shard in shards {
            if !store.exists(shard) {
                warn!(run, shard = %shard.display(), "declared shard log is missing");
                continue;
            }
            records.extend(store.read_records(shard)?);
            consumed_shards.push(shard.clone());
        }
        records.sort_by(|a, b| {
            a.question_id
                .cmp(&b.question_id)
                .then_with(|| a.source_file.cmp(&b.source_file))
        });

        let merged = merged_run_path(results_dir, timestamp, *run);
        store.write_records(&merged, &records)?;
        info!(run, shards = shards.len(), records = records.len(), "run merged");
        merged_logs.insert(*run, merged);
    }

    // (run, file) -> (correct, total), read back from the merged logs.
    let mut tallies: HashMap<(u32, String), (usize, usize)> = HashMap::new();
    for (run, merged) in &merged_logs {
        for record in store.read_records(merged)? {
            let Some(file) = record.source_file else {
                continue;
            };
            let tally = tallies.entry((*run, file)).or_default();
            tally.1 += 1;
            if record.is_correct {
                tally.0 += 1;
            }
        }
    }

    let mut dataset_results = BTreeMap::new();
    for (dataset, files) in &index.dataset_files {
        let mut file_results = Vec::with_capacity(files.len());
        for (file, runs) in files {
            let mut accuracies = Vec::with_capacity(runs.len());
            let mut paths = Vec::with_capacity(runs.len());
            for run in runs {
                if let Some(merged) = merged_logs.get(run) {
                    paths.push(merged.to_string_lossy().into_owned());
                }
                let accuracy = match tallies.get(&(*run, file.clone())) {
                    Some((correct, total)) if *total > 0 => *correct as f64 / *total as f64,
                    Some(_) => 0.0,
                    None => declared_accuracy(summaries, dataset, file, *run),
                };
                accuracies.push(accuracy);
            }
            file_results.push(FileResult::from_runs(file.clone(), accuracies, paths));
        }
        let result = DatasetResult::from_files(file_results);
        obs::emit_dataset_evaluated(dataset, result.average_accuracy, result.average_std);
        dataset_results.insert(dataset.clone(), result);
    }

    METRICS.add_shards_merged(consumed_shards.len() as u64);
    obs::emit_merge_completed(
        timestamp,
        merged_logs.len(),
        consumed_shards.len(),
        dataset_results.len(),
    );

    Ok(MergeOutcome {
        report: FinalReport::new(
            timestamp,
            base.report.config.clone(),
            base.report.duration_seconds,
            dataset_results,
        ),
        merged_logs,
        consumed_shards,
    })
}

/// Deletes merge inputs when dropped, provided the export committed.
/// Deletion failures are logged and swallowed.
struct CleanupGuard<'a> {
    store: &'a dyn ShardStore,
    paths: Vec<PathBuf>,
    committed: bool,
}

impl<'a> CleanupGuard<'a> {
    fn new(store: &'a dyn ShardStore, summaries: Vec<PathBuf>) -> Self {
        Self {
            store,
            paths: summaries,
            committed: false,
        }
    }

    fn track(&mut self, paths: impl IntoIterator<Item = PathBuf>) {
        self.paths.extend(paths);
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            warn!(inputs = self.paths.len(), "final report not exported, keeping merge inputs");
            return;
        }
        for path in &self.paths {
            if let Err(e) = self.store.remove(path) {
                obs::emit_cleanup_failed(path, &e);
            }
        }
        info!(removed = self.paths.len(), "merge inputs cleaned up");
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    /// Shards were merged and the final report exported.
    Merged {
        report: FinalReport,
        exported: Vec<PathBuf>,
    },
    /// No shards, but a final report already exists.
    AlreadyFinal { report_path: PathBuf },
    /// Neither shards nor a final report exist.
    NotFound,
}

/// Everything `finalize` needs besides the timestamp.
pub struct Finalizer<'a> {
    pub results_dir: &'a Path,
    pub store: &'a dyn ShardStore,
    pub exporter: &'a dyn ReportExporter,
    pub publisher: Option<&'a dyn ResultPublisher>,
}

impl Finalizer<'_> {
    /// Discover the summaries of `timestamp`, merge, export, clean up, and
    /// publish. Running it again after success takes the `AlreadyFinal` path.
    #[instrument(skip(self), fields(results_dir = %self.results_dir.display()))]
    pub fn finalize(&self, timestamp: &str) -> Result<FinalizeOutcome> {
        let _span = obs::EvalSpan::enter(timestamp);
        let mut summary_paths = Vec::new();
        for entry in glob::glob(&summary_glob(self.results_dir, timestamp))? {
            summary_paths.push(entry.map_err(|e| e.into_error())?);
        }
        summary_paths.sort();

        if summary_paths.is_empty() {
            let report_path = final_report_path(self.results_dir, timestamp);
            if !report_path.is_file() {
                warn!(timestamp = %timestamp, "no shards or final result found");
                return Ok(FinalizeOutcome::NotFound);
            }
            info!(path = %report_path.display(), "no shards, final report already present");
            let report = ShardSummary::load(&report_path)?.report;
            self.publish(&report, timestamp);
            return Ok(FinalizeOutcome::AlreadyFinal { report_path });
        }
        info!(summaries = summary_paths.len(), "merging distributed results");

        let mut guard = CleanupGuard::new(self.store, summary_paths.clone());
        let summaries = summary_paths
            .into_iter()
            .map(ShardSummary::load)
            .collect::<Result<Vec<_>>>()?;

        let outcome = merge_shards(timestamp, &summaries, self.store, self.results_dir)?;
        guard.track(outcome.consumed_shards.iter().cloned());

        let base_path = self.results_dir.join(format!("results_{timestamp}"));
        let exported = self
            .exporter
            .export(&outcome.report, &base_path, DEFAULT_FORMATS)
            .map_err(|e| TwinkleError::Export(format!("{e:#}")))?;
        guard.commit();
        drop(guard);
        METRICS.flush();

        self.publish(&outcome.report, timestamp);
        Ok(FinalizeOutcome::Merged {
            report: outcome.report,
            exported,
        })
    }

    fn publish(&self, report: &FinalReport, timestamp: &str) {
        let Some(publisher) = self.publisher else {
            return;
        };
        if let Err(e) = publisher.publish(report.model_name(), self.results_dir, timestamp) {
            warn!(error = %format!("{e:#}"), "publishing results failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnswerRecord, TokenUsage};
    use crate::fakes::MemoryShardStore;
    use serde_json::json;

    const TS: &str = "20250101_1200";

    fn record(id: usize, file: Option<&str>, correct: bool) -> AnswerRecord {
        AnswerRecord {
            question_id: id,
            question_text: format!("q{id}"),
            correct_label: "A".to_string(),
            raw_output: String::new(),
            reasoning_text: None,
            predicted_label: Some(if correct { "A" } else { "B" }.to_string()),
            is_correct: correct,
            token_usage: TokenUsage::default(),
            source_file: file.map(str::to_string),
        }
    }

    fn summary(path: &str, files: &[(&str, Vec<f64>, Vec<&str>)]) -> ShardSummary {
        let results = files
            .iter()
            .map(|(file, accs, shards)| {
                FileResult::from_runs(*file, accs.clone(), shards.iter().map(|s| s.to_string()).collect())
            })
            .collect();
        let mut datasets = BTreeMap::new();
        datasets.insert("datasets/mmlu".to_string(), DatasetResult::from_files(results));
        ShardSummary {
            path: PathBuf::from(path),
            report: FinalReport::new(TS, json!({"model": {"name": "m"}}), 3.0, datasets),
        }
    }

    #[test]
    fn index_dedupes_shards_and_tracks_runs() {
        let s0 = summary(
            "r/s0.json",
            &[
                ("a.json", vec![1.0, 0.5], vec!["r/run0_node0", "r/run1_node0"]),
                ("b.json", vec![1.0], vec!["r/run0_node0"]),
            ],
        );
        let s1 = summary("r/s1.json", &[("a.json", vec![0.0], vec!["r/run0_node1"])]);
        let index = build_index(&[s0, s1]);

        assert_eq!(
            index.run_shards[&0],
            vec![PathBuf::from("r/run0_node0"), PathBuf::from("r/run0_node1")]
        );
        assert_eq!(index.run_shards[&1], vec![PathBuf::from("r/run1_node0")]);
        let files = &index.dataset_files["datasets/mmlu"];
        assert_eq!(files[0].0, "a.json");
        assert_eq!(files[0].1, BTreeSet::from([0, 1]));
        assert_eq!(files[1].1, BTreeSet::from([0]));
        assert_eq!(index.shard_count(), 3);
    }

    #[test]
    fn accuracy_is_pooled_across_shards_of_a_run() {
        let store = MemoryShardStore::new();
        // node0: 1 of 1 correct, node1: 1 of 3 correct -> pooled 2/4.
        store
            .insert_records("r/s_node0", &[record(0, Some("a.json"), true)])
            .unwrap();
        store
            .insert_records(
                "r/s_node1",
                &[
                    record(1, Some("a.json"), true),
                    record(2, Some("a.json"), false),
                    record(3, Some("a.json"), false),
                ],
            )
            .unwrap();
        let summaries = [
            summary("r/n0.json", &[("a.json", vec![1.0], vec!["r/s_node0"])]),
            summary("r/n1.json", &[("a.json", vec![0.3333], vec!["r/s_node1"])]),
        ];

        let out = merge_shards(TS, &summaries, &store, Path::new("r")).unwrap();
        let file = out.report.dataset_results["datasets/mmlu"].file("a.json").unwrap().clone();
        assert!((file.accuracy_mean - 0.5).abs() < 1e-12);
        assert_eq!(file.accuracy_std, 0.0);
        assert_eq!(out.consumed_shards.len(), 2);
    }

    #[test]
    fn merged_log_sorted_by_question_id() {
        let store = MemoryShardStore::new();
        store
            .insert_records("r/x", &[record(3, Some("a"), true), record(0, Some("a"), true)])
            .unwrap();
        store
            .insert_records("r/y", &[record(2, Some("b"), true), record(1, Some("a"), false), record(2, Some("a"), true)])
            .unwrap();
        let summaries = [summary("r/n0.json", &[("a", vec![1.0], vec!["r/x"]), ("b", vec![1.0], vec!["r/y"])])];

        let out = merge_shards(TS, &summaries, &store, Path::new("r")).unwrap();
        let merged = store.read_records(&out.merged_logs[&0]).unwrap();
        let keys: Vec<(usize, Option<String>)> =
            merged.iter().map(|r| (r.question_id, r.source_file.clone())).collect();
        assert_eq!(
            keys,
            vec![
                (0, Some("a".to_string())),
                (1, Some("a".to_string())),
                (2, Some("a".to_string())),
                (2, Some("b".to_string())),
                (3, Some("a".to_string())),
            ]
        );
        assert_eq!(out.merged_logs[&0], PathBuf::from("r/eval_results_20250101_1200_run0.jsonl"));
    }

    #[test]
    fn legacy_records_fall_back_to_declared_accuracy() {
        let store = MemoryShardStore::new();
        store.insert_records("r/old0", &[record(0, None, true)]).unwrap();
        store.insert_records("r/old1", &[record(1, None, false)]).unwrap();
        let summaries = [
            summary("r/n0.json", &[("a.json", vec![0.8], vec!["r/old0"])]),
            summary("r/n1.json", &[("a.json", vec![0.6], vec!["r/old1"])]),
        ];
        let out = merge_shards(TS, &summaries, &store, Path::new("r")).unwrap();
        let file = out.report.dataset_results["datasets/mmlu"].file("a.json").unwrap().clone();
        assert!((file.accuracy_mean - 0.7).abs() < 1e-12);
    }

    #[test]
    fn run_without_attribution_or_declaration_counts_zero() {
        let store = MemoryShardStore::new();
        let summaries = [summary("r/n0.json", &[("a.json", vec![], vec!["r/gone"])])];
        let out = merge_shards(TS, &summaries, &store, Path::new("r")).unwrap();
        let file = out.report.dataset_results["datasets/mmlu"].file("a.json").unwrap().clone();
        assert_eq!(file.individual_runs.accuracies, vec![0.0]);
        assert!(out.consumed_shards.is_empty());
    }

    #[test]
    fn missing_base_config_is_fatal() {
        let store = MemoryShardStore::new();
        let mut s = summary("r/n0.json", &[]);
        s.report.config = serde_json::Value::Null;
        let err = merge_shards(TS, &[s], &store, Path::new("r")).unwrap_err();
        assert!(matches!(err, TwinkleError::MissingBaseConfig(_)));
    }

    #[test]
    fn corrupt_shard_line_is_fatal() {
        let store = MemoryShardStore::new();
        store.insert_raw("r/bad", "garbage\n{\"question_id\": 1}\n");
        let summaries = [summary("r/n0.json", &[("a.json", vec![1.0], vec!["r/bad"])])];
        let err = merge_shards(TS, &summaries, &store, Path::new("r")).unwrap_err();
        assert!(matches!(err, TwinkleError::CorruptShard { .. }));
    }

    #[test]
    fn mean_and_std_over_three_runs() {
        let store = MemoryShardStore::new();
        let summaries = [summary(
            "r/n0.json",
            &[("a.json", vec![0.8, 0.6, 1.0], vec!["r/s0", "r/s1", "r/s2"])],
        )];
        let out = merge_shards(TS, &summaries, &store, Path::new("r")).unwrap();
        let file = out.report.dataset_results["datasets/mmlu"].file("a.json").unwrap().clone();
        assert!((file.accuracy_mean - 0.8).abs() < 1e-12);
        assert!((file.accuracy_std - 0.163_299_316_185_545_2).abs() < 1e-9);
        assert_eq!(file.individual_runs.shard_paths.len(), 3);
    }

    #[test]
    fn guard_only_deletes_after_commit() {
        let store = MemoryShardStore::new();
        store.insert_raw("a", "");
        store.insert_raw("b", "");
        store.deny_remove("b");
        {
            let _guard = CleanupGuard::new(&store, vec![PathBuf::from("a")]);
        }
        assert!(store.exists(Path::new("a")));
        {
            let mut guard = CleanupGuard::new(&store, vec![PathBuf::from("a")]);
            guard.track([PathBuf::from("b"), PathBuf::from("missing")]);
            guard.commit();
        }
        assert!(!store.exists(Path::new("a")));
        assert!(store.exists(Path::new("b")));
    }
}
