//! End-to-end evaluation: datasets x files x repeat runs.
//!
//! Single-process runs write each run's log under its merged name and export
//! the final report. Distributed ranks evaluate their share of every file,
//! write node-suffixed shard logs, and leave a summary document for
//! [`crate::aggregator::Finalizer`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, instrument, Instrument};

use crate::config::EvalConfig;
use crate::dataset::{find_evaluation_files, load_questions};
use crate::dispatcher::Dispatcher;
use crate::domain::{DatasetResult, FileResult, FinalReport, Question, Result, TwinkleError};
use crate::export::{write_report_json, FileExporter, ReportExporter};
use crate::extractor::extractor_for;
use crate::llm::LlmClient;
use crate::metrics::METRICS;
use crate::obs;
use crate::rate_limiter::RateLimiter;
use crate::shard::{merged_run_path, shard_path, summary_path, NodeId, ShardWriter};

/// Timestamp identifying one evaluation, e.g. `20250101_1200`.
pub fn new_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M").to_string()
}

/// Where this process sits in a distributed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Distribution {
    pub node: u32,
    pub rank: u32,
    pub world_size: u32,
}

impl Default for Distribution {
    fn default() -> Self {
        Self {
            node: 0,
            rank: 0,
            world_size: 1,
        }
    }
}

impl Distribution {
    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }

    /// Questions this rank evaluates.
    pub fn owns(&self, question: &Question) -> bool {
        !self.is_distributed() || question.id % self.world_size as usize == self.rank as usize
    }

    fn node_id(&self) -> NodeId {
        let node = NodeId::new(self.node);
        if self.is_distributed() {
            node.with_rank(self.rank)
        } else {
            node
        }
    }
}

/// What a run left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub timestamp: String,
    pub report: FinalReport,
    /// Exported report files, or the summary document of a distributed rank.
    pub written: Vec<PathBuf>,
}

pub struct EvaluationRunner {
    config: EvalConfig,
    dispatcher: Dispatcher,
    results_dir: PathBuf,
    distribution: Distribution,
    exporter: Box<dyn ReportExporter>,
    formats: Vec<String>,
}

impl EvaluationRunner {
    /// Wire the dispatcher from `config` around the given model client.
    pub fn new(config: EvalConfig, llm: Arc<dyn LlmClient>) -> Result<Self> {
        let extractor = extractor_for(&config.evaluation.evaluation_method)?;
        let limiter = Arc::new(RateLimiter::new(config.llm_api.api_rate_limit));
        let dispatcher = Dispatcher::new(llm, extractor, limiter, config.dispatch());
        Ok(Self {
            config,
            dispatcher,
            results_dir: PathBuf::from("results"),
            distribution: Distribution::default(),
            exporter: Box::new(FileExporter),
            formats: vec!["json".to_string()],
        })
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_formats(mut self, formats: Vec<String>) -> Self {
        self.formats = formats;
        self
    }

    pub fn with_exporter(mut self, exporter: Box<dyn ReportExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.dispatcher = self.dispatcher.with_seed(seed);
        self
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }

    fn log_path(&self, timestamp: &str, run: u32) -> PathBuf {
        if self.distribution.is_distributed() {
            shard_path(&self.results_dir, timestamp, run, self.distribution.node_id())
        } else {
            merged_run_path(&self.results_dir, timestamp, run)
        }
    }

    /// Evaluate every configured dataset. Pass a shared `timestamp` so
    /// cooperating ranks agree; otherwise a fresh one is generated.
    #[instrument(skip(self), fields(node = self.distribution.node, rank = self.distribution.rank))]
    pub async fn run(&self, timestamp: Option<String>) -> Result<RunSummary> {
        let timestamp = timestamp.unwrap_or_else(new_timestamp);
        let dataset_paths = self.config.evaluation.dataset_paths.to_vec();
        obs::emit_eval_started(&timestamp, &self.config.model.name, dataset_paths.len());
        let started = Instant::now();

        let mut writers = (0..self.config.evaluation.repeat_runs)
            .map(|run| ShardWriter::open(self.log_path(&timestamp, run)))
            .collect::<Result<Vec<_>>>()?;

        let mut dataset_results = BTreeMap::new();
        for dataset in &dataset_paths {
            let language = self.config.language_for(dataset);
            let files = match find_evaluation_files(dataset) {
                Ok(files) => files,
                Err(e) => {
                    error!(dataset = %dataset, error = %e, "dataset skipped");
                    continue;
                }
            };

            let mut file_results = Vec::with_capacity(files.len());
            for file in files {
                match self.evaluate_file(&timestamp, &file, language, &mut writers).await {
                    Ok(result) => file_results.push(result),
                    Err(e) => error!(file = %file.display(), error = %e, "file skipped"),
                }
            }
            if file_results.is_empty() {
                continue;
            }
            let result = DatasetResult::from_files(file_results);
            obs::emit_dataset_evaluated(dataset, result.average_accuracy, result.average_std);
            dataset_results.insert(dataset.clone(), result);
        }
        drop(writers);

        let duration = started.elapsed().as_secs_f64();
        let report = FinalReport::new(
            timestamp.clone(),
            self.config.snapshot(),
            duration,
            dataset_results,
        );

        let written = if self.distribution.is_distributed() {
            let path = summary_path(&self.results_dir, &timestamp, self.distribution.node_id());
            write_report_json(&path, &report).map_err(|e| TwinkleError::Export(format!("{e:#}")))?;
            info!(path = %path.display(), "rank summary written");
            vec![path]
        } else {
            let formats: Vec<&str> = self.formats.iter().map(String::as_str).collect();
            let base = self.results_dir.join(format!("results_{timestamp}"));
            self.exporter
                .export(&report, &base, &formats)
                .map_err(|e| TwinkleError::Export(format!("{e:#}")))?
        };

        METRICS.flush();
        obs::emit_eval_finished(&timestamp, duration, report.dataset_results.len());
        Ok(RunSummary {
            timestamp,
            report,
            written,
        })
    }

    async fn evaluate_file(
        &self,
        timestamp: &str,
        file: &Path,
        language: &str,
        writers: &mut [ShardWriter],
    ) -> Result<FileResult> {
        let file_key = file.to_string_lossy().into_owned();
        let questions: Vec<Question> = load_questions(file)?
            .into_iter()
            .filter(|q| self.distribution.owns(q))
            .collect();

        let mut accuracies = Vec::with_capacity(writers.len());
        let mut logs = Vec::with_capacity(writers.len());
        for (run, writer) in writers.iter_mut().enumerate() {
            let outcome = self
                .dispatcher
                .evaluate_file(&file_key, &questions, language, writer)
                .instrument(obs::run_span(timestamp, run as u32, &file_key))
                .await?;
            obs::emit_file_evaluated(
                &file_key,
                run as u32,
                outcome.accuracy,
                outcome.scored,
                outcome.failed,
            );
            accuracies.push(outcome.accuracy);
            logs.push(outcome.shard_path.to_string_lossy().into_owned());
        }
        Ok(FileResult::from_runs(file_key, accuracies, logs))
    }
}
