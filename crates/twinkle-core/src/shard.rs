//! Shard logs: append-only JSONL files of answer records, one per
//! `(timestamp, run, node)`.
//!
//! Path layout under a results directory:
//! - `eval_results_{ts}_run{r}_{node}.jsonl`: one shard log per run and node
//! - `results_{ts}_{node}.json`: per node/rank summary document
//! - `eval_results_{ts}_run{r}.jsonl`: merged log for one run
//! - `results_{ts}.json`: final report

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::domain::{AnswerRecord, Result, TwinkleError};
use crate::metrics::METRICS;

/// Identity of the process writing shards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub node: u32,
    pub rank: Option<u32>,
}

impl NodeId {
    pub fn new(node: u32) -> Self {
        Self { node, rank: None }
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rank {
            Some(rank) => write!(f, "node{}_rank{}", self.node, rank),
            None => write!(f, "node{}", self.node),
        }
    }
}

pub fn shard_path(results_dir: &Path, timestamp: &str, run: u32, node: NodeId) -> PathBuf {
    results_dir.join(format!("eval_results_{timestamp}_run{run}_{node}.jsonl"))
}

/// Summary document of one node/rank. Always carries a rank so that
/// [`summary_glob`] finds it.
pub fn summary_path(results_dir: &Path, timestamp: &str, node: NodeId) -> PathBuf {
    let node = NodeId {
        rank: Some(node.rank.unwrap_or(0)),
        ..node
    };
    results_dir.join(format!("results_{timestamp}_{node}.json"))
}

pub fn summary_glob(results_dir: &Path, timestamp: &str) -> String {
    results_dir
        .join(format!("results_{timestamp}_node*_rank*.json"))
        .to_string_lossy()
        .into_owned()
}

pub fn merged_run_path(results_dir: &Path, timestamp: &str, run: u32) -> PathBuf {
    results_dir.join(format!("eval_results_{timestamp}_run{run}.jsonl"))
}

pub fn final_report_path(results_dir: &Path, timestamp: &str) -> PathBuf {
    results_dir.join(format!("results_{timestamp}.json"))
}

/// Single-writer appender for one shard log.
///
/// Opening an existing shard appends to it, after cutting any unterminated
/// tail left by an interrupted write back to the last complete line. Every
/// record is flushed before [`ShardWriter::append`] returns.
pub struct ShardWriter {
    path: PathBuf,
    out: BufWriter<File>,
    written: usize,
}

impl ShardWriter {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        trim_torn_tail(&path, &file)?;
        debug!(path = %path.display(), "shard opened");
        Ok(Self {
            path,
            out: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this writer (not counting earlier sessions).
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn append(&mut self, record: &AnswerRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        self.written += 1;
        METRICS.inc_records_written();
        Ok(())
    }
}

fn trim_torn_tail(path: &Path, file: &File) -> Result<()> {
    let meta = file.metadata()?;
    if !meta.is_file() || meta.len() == 0 {
        return Ok(());
    }
    let bytes = fs::read(path)?;
    if bytes.last().map_or(true, |b| *b == b'\n') {
        return Ok(());
    }
    let keep = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    warn!(
        path = %path.display(),
        dropped_bytes = bytes.len() - keep,
        "truncating unterminated shard tail before resuming"
    );
    file.set_len(keep as u64)?;
    Ok(())
}

/// Read every record of a shard or merged log.
pub fn read_records(path: &Path) -> Result<Vec<AnswerRecord>> {
    let bytes = fs::read(path)?;
    parse_records(path, &String::from_utf8_lossy(&bytes))
}

/// Parse JSONL text. Blank lines are skipped. A final line that fails to
/// parse is treated as an interrupted write and dropped; any earlier bad
/// line is [`TwinkleError::CorruptShard`].
pub fn parse_records(path: &Path, text: &str) -> Result<Vec<AnswerRecord>> {
    let lines: Vec<(usize, &str)> = text
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .collect();
    let last = lines.len().saturating_sub(1);

    let mut records = Vec::with_capacity(lines.len());
    for (pos, (lineno, line)) in lines.into_iter().enumerate() {
        match serde_json::from_str::<AnswerRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) if pos == last => {
                warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "dropping truncated final shard line"
                );
            }
            Err(e) => {
                return Err(TwinkleError::CorruptShard {
                    path: path.to_path_buf(),
                    line: lineno + 1,
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok(records)
}

/// Render records as JSONL text, one record per line.
pub fn render_records(records: &[AnswerRecord]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}
