//! In-memory fakes for the engine's seams (testing only).
//!
//! Provides `ScriptedLlm` for [`LlmClient`] and `MemoryShardStore` for
//! [`ShardStore`], neither touching the network or the filesystem.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{AnswerRecord, Result, TokenUsage, TwinkleError};
use crate::llm::{LlmClient, LlmError, LlmResponse};
use crate::shard::{parse_records, render_records};
use crate::store::ShardStore;

// ---------------------------------------------------------------------------
// ScriptedLlm
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
    /// Answer with the label whose option text equals this string.
    OptionText(String),
}

/// Model fake answering by prompt substring. The first matching rule wins;
/// unmatched prompts use the default reply or fail.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    rules: Vec<(String, Reply)>,
    default: Option<Reply>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, prompt_contains: &str, content: &str) -> Self {
        self.rules
            .push((prompt_contains.to_string(), Reply::Text(content.to_string())));
        self
    }

    pub fn fail(mut self, prompt_contains: &str, message: &str) -> Self {
        self.rules
            .push((prompt_contains.to_string(), Reply::Fail(message.to_string())));
        self
    }

    pub fn default_response(mut self, content: &str) -> Self {
        self.default = Some(Reply::Text(content.to_string()));
        self
    }

    pub fn answer_with_option_text(mut self, text: &str) -> Self {
        self.default = Some(Reply::OptionText(text.to_string()));
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn label_holding(prompt: &str, text: &str) -> Option<String> {
    prompt.lines().find_map(|line| {
        let (key, value) = line.split_once(": ")?;
        (value == text).then(|| key.to_string())
    })
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn call(&self, prompt: &str, _language: &str) -> std::result::Result<LlmResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .or_else(|| self.default.clone());

        let content = match reply {
            Some(Reply::Text(content)) => content,
            Some(Reply::Fail(message)) => return Err(LlmError::Other(message)),
            Some(Reply::OptionText(text)) => match label_holding(prompt, &text) {
                Some(label) => format!("The answer is ({label})"),
                None => "I don't know".to_string(),
            },
            None => return Err(LlmError::Other(format!("no scripted reply for: {prompt}"))),
        };
        Ok(LlmResponse {
            content,
            reasoning: None,
            usage: TokenUsage {
                completion: 5,
                prompt: 20,
                total: 25,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryShardStore
// ---------------------------------------------------------------------------

/// In-memory shard store keyed by path, holding raw JSONL text.
#[derive(Debug, Default)]
pub struct MemoryShardStore {
    files: Mutex<BTreeMap<PathBuf, String>>,
    undeletable: Mutex<HashSet<PathBuf>>,
}

impl MemoryShardStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_records(&self, path: impl Into<PathBuf>, records: &[AnswerRecord]) -> Result<()> {
        self.insert_raw(path, render_records(records)?);
        Ok(())
    }

    /// Store arbitrary text, e.g. a truncated or corrupt log.
    pub fn insert_raw(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.lock_files().insert(path.into(), text.into());
    }

    /// Make `remove` fail for `path`.
    pub fn deny_remove(&self, path: impl Into<PathBuf>) {
        self.undeletable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.into());
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.lock_files().keys().cloned().collect()
    }

    fn lock_files(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, String>> {
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ShardStore for MemoryShardStore {
    fn exists(&self, path: &Path) -> bool {
        self.lock_files().contains_key(path)
    }

    fn read_records(&self, path: &Path) -> Result<Vec<AnswerRecord>> {
        let files = self.lock_files();
        let text = files.get(path).ok_or_else(|| not_found(path))?;
        parse_records(path, text)
    }

    fn write_records(&self, path: &Path, records: &[AnswerRecord]) -> Result<()> {
        let text = render_records(records)?;
        self.lock_files().insert(path.to_path_buf(), text);
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        let denied = self
            .undeletable
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(path);
        if denied {
            return Err(TwinkleError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("cannot remove {}", path.display()),
            )));
        }
        self.lock_files()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }
}

fn not_found(path: &Path) -> TwinkleError {
    TwinkleError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    ))
}
