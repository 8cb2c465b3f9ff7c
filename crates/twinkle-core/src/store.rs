//! Storage seam used by the merger.
//!
//! [`FsShardStore`] works on the local filesystem; tests use
//! `fakes::MemoryShardStore`.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::domain::{AnswerRecord, Result};
use crate::shard::{read_records, render_records};

pub trait ShardStore: Send + Sync {
    fn exists(&self, path: &Path) -> bool;

    fn read_records(&self, path: &Path) -> Result<Vec<AnswerRecord>>;

    /// Replace `path` with exactly `records`, one JSON line each.
    fn write_records(&self, path: &Path, records: &[AnswerRecord]) -> Result<()>;

    fn remove(&self, path: &Path) -> Result<()>;
}

/// Filesystem store. Writes go through a temp file in the target directory
/// and are renamed into place.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsShardStore;

impl ShardStore for FsShardStore {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read_records(&self, path: &Path) -> Result<Vec<AnswerRecord>> {
        read_records(path)
    }

    fn write_records(&self, path: &Path, records: &[AnswerRecord]) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(render_records(records)?.as_bytes())?;
        tmp.flush()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<()> {
        fs::remove_file(path)?;
        Ok(())
    }
}
