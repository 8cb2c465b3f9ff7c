//! Structured lifecycle events.
//!
//! Every event is an `info!` (or `warn!`) record carrying an `event` field so
//! log pipelines can filter on it:
//! - `eval.started` / `eval.finished`
//! - `file.evaluated`, `dataset.evaluated`
//! - `task.failed`, `question.skipped`
//! - `merge.completed`, `cleanup.failed`

use std::path::Path;

use tracing::{info, warn};

/// RAII guard entering a span tagged with the evaluation timestamp.
///
/// ```ignore
/// let _span = EvalSpan::enter("20250101_1200");
/// // every event below carries timestamp = "20250101_1200"
/// ```
pub struct EvalSpan {
    _span: tracing::span::EnteredSpan,
}

impl EvalSpan {
    pub fn enter(timestamp: &str) -> Self {
        let span = tracing::info_span!("twinkle.eval", timestamp = %timestamp);
        Self {
            _span: span.entered(),
        }
    }
}

/// Span for one repeat run of one file. Attach it to async work with
/// `tracing::Instrument` rather than entering it across awaits.
pub fn run_span(timestamp: &str, run: u32, file: &str) -> tracing::Span {
    tracing::info_span!("twinkle.run", timestamp = %timestamp, run, file = %file)
}

pub fn emit_eval_started(timestamp: &str, model: &str, datasets: usize) {
    info!(event = "eval.started", timestamp = %timestamp, model = %model, datasets);
}

pub fn emit_eval_finished(timestamp: &str, duration_seconds: f64, datasets: usize) {
    info!(
        event = "eval.finished",
        timestamp = %timestamp,
        duration_seconds,
        datasets,
    );
}

/// One run of one question file completed.
pub fn emit_file_evaluated(file: &str, run: u32, accuracy: f64, scored: usize, failed: usize) {
    info!(
        event = "file.evaluated",
        file = %file,
        run,
        accuracy,
        scored,
        failed,
    );
}

pub fn emit_dataset_evaluated(dataset: &str, average_accuracy: f64, average_std: f64) {
    info!(
        event = "dataset.evaluated",
        dataset = %dataset,
        average_accuracy,
        average_std,
    );
}

/// A single question's model call failed or its task panicked.
pub fn emit_task_failed(file: &str, question_id: Option<usize>, error: &dyn std::fmt::Display) {
    warn!(event = "task.failed", file = %file, question_id, error = %error);
}

/// A question was excluded from scoring.
pub fn emit_question_skipped(file: &str, question_id: usize, reason: &str) {
    warn!(event = "question.skipped", file = %file, question_id, reason = %reason);
}

pub fn emit_merge_completed(timestamp: &str, runs: usize, shards: usize, datasets: usize) {
    info!(
        event = "merge.completed",
        timestamp = %timestamp,
        runs,
        shards,
        datasets,
    );
}

/// Best-effort deletion failed; never fatal.
pub fn emit_cleanup_failed(path: &Path, error: &dyn std::fmt::Display) {
    warn!(event = "cleanup.failed", path = %path.display(), error = %error);
}
