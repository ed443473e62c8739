use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("directory missing or not writable: {0}")]
    Dir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Ensure a directory exists; create if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), PersistError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| PersistError::Dir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(PersistError::Dir(format!("{} is not a directory", dir.display())));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| PersistError::Dir(e.to_string()))?;
    }
    Ok(())
}

/// Writes files under `dir` through a temp file and rename, so readers never see a partial file.
#[derive(Debug, Clone)]
pub struct AtomicFileWriter {
    dir: PathBuf,
}

impl AtomicFileWriter {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Replaces `{dir}/{filename}` if it exists.
    pub fn write(&self, filename: &str, content: &[u8]) -> Result<PathBuf, PersistError> {
        let target = self.dir.join(filename);
        let tmp = self.stage(&target, content)?;
        tmp.persist(&target).map_err(|e| PersistError::Io(e.error))?;
        Ok(target)
    }

    /// Like [`write`](Self::write) but leaves an existing file untouched.
    /// Returns `false` when the target was already present.
    pub fn write_new(&self, filename: &str, content: &[u8]) -> Result<bool, PersistError> {
        let target = self.dir.join(filename);
        if target.exists() {
            return Ok(false);
        }
        let tmp = self.stage(&target, content)?;
        match tmp.persist_noclobber(&target) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(PersistError::Io(e.error)),
        }
    }

    fn stage(&self, target: &Path, content: &[u8]) -> Result<NamedTempFile, PersistError> {
        let parent = target.parent().unwrap_or(&self.dir);
        ensure_dir(parent)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(content)?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        Ok(tmp)
    }
}
