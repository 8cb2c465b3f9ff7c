//! Concurrent evaluation of one question file.
//!
//! Each question becomes one tokio task, spawned once the shared
//! [`RateLimiter`] admits it. Finished records are appended to the run's
//! shard log in completion order. A failed call or panicked task drops that
//! one record; its siblings keep going.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{debug, instrument};

use crate::config::{DispatchConfig, ThinkingTags};
use crate::domain::{is_correct, AnswerRecord, Question, Result, TwinkleError};
use crate::extractor::AnswerExtractor;
use crate::llm::{LlmClient, LlmError};
use crate::metrics::METRICS;
use crate::obs;
use crate::rate_limiter::RateLimiter;
use crate::shard::ShardWriter;
use crate::shuffle::shuffle_options;
use crate::thinking::split_reasoning;

/// Result of evaluating one file in one run.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    pub file_path: String,
    /// `correct / scored`, `0.0` when nothing was scored.
    pub accuracy: f64,
    pub shard_path: PathBuf,
    pub scored: usize,
    pub correct: usize,
    /// Calls that failed or tasks that panicked.
    pub failed: usize,
    /// Questions without a usable correct label.
    pub skipped: usize,
}

pub struct Dispatcher {
    llm: Arc<dyn LlmClient>,
    extractor: Arc<dyn AnswerExtractor>,
    limiter: Arc<RateLimiter>,
    config: DispatchConfig,
    /// One stream for the dispatcher's lifetime, so successive files and
    /// repeat runs draw different permutations.
    rng: Mutex<StdRng>,
}

struct Task {
    llm: Arc<dyn LlmClient>,
    extractor: Arc<dyn AnswerExtractor>,
    thinking: Option<ThinkingTags>,
    language: String,
    source_file: String,
}

impl Dispatcher {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        extractor: Arc<dyn AnswerExtractor>,
        limiter: Arc<RateLimiter>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            llm,
            extractor,
            limiter,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Fix the option-shuffling seed. The same seed and the same sequence of
    /// `evaluate_file` calls reproduce the same layouts.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Evaluate `questions` from `file_path`, appending every finished record
    /// to `shard` before returning.
    #[instrument(skip(self, questions, shard), fields(file = %file_path, questions = questions.len()))]
    pub async fn evaluate_file(
        &self,
        file_path: &str,
        questions: &[Question],
        language: &str,
        shard: &mut ShardWriter,
    ) -> Result<FileOutcome> {
        let (prepared, skipped) = self.prepare(file_path, questions);

        let semaphore = self.config.max_concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let task = Arc::new(Task {
            llm: Arc::clone(&self.llm),
            extractor: Arc::clone(&self.extractor),
            thinking: self.config.thinking.clone(),
            language: language.to_string(),
            source_file: file_path.to_string(),
        });

        let mut outcome = FileOutcome {
            file_path: file_path.to_string(),
            accuracy: 0.0,
            shard_path: shard.path().to_path_buf(),
            scored: 0,
            correct: 0,
            failed: 0,
            skipped,
        };

        let mut pending = FuturesUnordered::new();
        let mut aborts = Vec::with_capacity(prepared.len());
        for (question, expected) in prepared {
            self.limiter.wait().await;

            let id = question.id;
            let task = Arc::clone(&task);
            let semaphore = semaphore.clone();
            METRICS.inc_questions_dispatched();
            let handle = tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(s) => s.acquire_owned().await.ok(),
                    None => None,
                };
                task.run(question, expected).await
            });
            aborts.push(handle.abort_handle());
            pending.push(handle.map(move |joined| (id, joined)));

            while let Some(Some((id, joined))) = pending.next().now_or_never() {
                collect(&mut outcome, shard, id, joined).map_err(|e| abort_all(&aborts, e))?;
            }
        }
        while let Some((id, joined)) = pending.next().await {
            collect(&mut outcome, shard, id, joined).map_err(|e| abort_all(&aborts, e))?;
        }

        outcome.accuracy = if outcome.scored == 0 {
            0.0
        } else {
            outcome.correct as f64 / outcome.scored as f64
        };
        Ok(outcome)
    }

    /// Drop unscorable questions and shuffle options when enabled.
    fn prepare(&self, file_path: &str, questions: &[Question]) -> (Vec<(Question, String)>, usize) {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let mut skipped = 0;
        let mut prepared = Vec::with_capacity(questions.len());
        for question in questions {
            if question.expected_label().is_none() {
                obs::emit_question_skipped(file_path, question.id, "missing or blank correct label");
                skipped += 1;
                continue;
            }
            let question = if self.config.shuffle_options {
                shuffle_options(question, &mut *rng)
            } else {
                question.clone()
            };
            if let Some(expected) = question.expected_label() {
                prepared.push((question, expected));
            }
        }
        (prepared, skipped)
    }
}

/// Stop in-flight calls whose records could no longer be written.
fn abort_all(aborts: &[AbortHandle], err: TwinkleError) -> TwinkleError {
    for handle in aborts {
        handle.abort();
    }
    err
}

fn collect(
    outcome: &mut FileOutcome,
    shard: &mut ShardWriter,
    id: usize,
    joined: std::result::Result<std::result::Result<AnswerRecord, LlmError>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(Ok(record)) => {
            shard.append(&record)?;
            outcome.scored += 1;
            if record.is_correct {
                outcome.correct += 1;
            }
        }
        Ok(Err(e)) => {
            METRICS.inc_calls_failed();
            obs::emit_task_failed(&outcome.file_path, Some(id), &e);
            outcome.failed += 1;
        }
        Err(e) => {
            METRICS.inc_calls_failed();
            obs::emit_task_failed(&outcome.file_path, Some(id), &e);
            outcome.failed += 1;
        }
    }
    Ok(())
}

impl Task {
    async fn run(&self, question: Question, expected: String) -> std::result::Result<AnswerRecord, LlmError> {
        let prompt = question.render_prompt();
        let response = self.llm.call(&prompt, &self.language).await?;

        let (output, reasoning) = match (&response.reasoning, &self.thinking) {
            (None, Some(tags)) => match split_reasoning(&response.content, tags) {
                Some((answer, reasoning)) => (answer, Some(reasoning)),
                None => (response.content.clone(), None),
            },
            _ => (response.content.clone(), response.reasoning.clone()),
        };

        let predicted = self.extractor.extract_answer(&output);
        let correct = is_correct(predicted.as_deref(), &expected);
        debug!(question_id = question.id, ?predicted, correct, "question scored");

        Ok(AnswerRecord {
            question_id: question.id,
            question_text: prompt,
            correct_label: expected,
            raw_output: output,
            reasoning_text: reasoning,
            predicted_label: predicted,
            is_correct: correct,
            token_usage: response.usage,
            source_file: Some(self.source_file.clone()),
        })
    }
}
