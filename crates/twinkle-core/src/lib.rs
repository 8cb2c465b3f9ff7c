//! twinkle-eval core library
//!
//! Concurrent multiple-choice evaluation of LLMs, per-node shard logs, and
//! the distributed merge that folds them into one final report.

pub mod aggregator;
pub mod config;
pub mod dataset;
pub mod dispatcher;
pub mod domain;
pub mod export;
pub mod extractor;
pub mod fakes;
pub mod llm;
pub mod metrics;
pub mod obs;
pub mod publish;
pub mod rate_limiter;
pub mod runner;
pub mod shard;
pub mod shuffle;
pub mod store;
pub mod telemetry;
pub mod thinking;

pub use domain::{
    index_to_label, is_correct, label_to_index, AnswerRecord, ConfigError, DatasetResult,
    FileResult, FinalReport, Question, Result, TokenUsage, TwinkleError,
};

pub use aggregator::{
    build_index, merge_shards, FinalizeOutcome, Finalizer, MergeIndex, MergeOutcome, ShardSummary,
};
pub use config::{DispatchConfig, EvalConfig, RateLimit, ThinkingTags, CONFIG_TEMPLATE};
pub use dataset::{find_evaluation_files, load_questions};
pub use dispatcher::{Dispatcher, FileOutcome};
pub use export::{render_summary_md, FileExporter, ReportExporter};
pub use extractor::{extractor_for, AnswerExtractor, BoxExtractor, PatternExtractor};
pub use llm::{LlmClient, LlmError, LlmResponse, OpenAiCompatClient};
pub use publish::{DirectoryPublisher, ResultPublisher};
pub use rate_limiter::RateLimiter;
pub use runner::{new_timestamp, Distribution, EvaluationRunner, RunSummary};
pub use shard::{NodeId, ShardWriter};
pub use store::{FsShardStore, ShardStore};

pub use metrics::METRICS;
pub use obs::EvalSpan;
pub use telemetry::{init_tracing, LogFormat};

/// twinkle-eval version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
