//! Best-effort on-disk mirror of a cart, so a session's cart survives a
//! process restart.
//!
//! Writes go to a temp file in the same directory and are renamed into
//! place, so a reader never sees a half-written snapshot.
//!
//! As a [`CartObserver`] the mirror writes synchronously, on the caller's
//! runtime thread and while the session's cart lock is held. A slow disk
//! stalls that session's requests and ties up the worker for the write.

use crate::cart::{CartObserver, CartOperation, CartSnapshot};
use crate::session::SessionId;
use anyhow::{Context, Result};
use std::fs;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct FileMirror {
    path: PathBuf,
}

impl FileMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Mirror file for `session` under `dir` (`<dir>/<session>.json`).
    pub fn for_session(dir: &Path, session: &SessionId) -> Self {
        Self::new(dir.join(format!("{session}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, snapshot: &CartSnapshot) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create mirror directory {:?}", dir))?;

        let tmp = NamedTempFile::new_in(dir)
            .with_context(|| format!("failed to create temp file in {:?}", dir))?;
        let mut writer = BufWriter::new(tmp);
        serde_json::to_writer(&mut writer, snapshot).context("failed to encode cart snapshot")?;
        writer.flush().context("failed to flush cart snapshot")?;
        let tmp = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .context("failed to finish cart snapshot")?;
        tmp.persist(&self.path)
            .map_err(|e| e.error)
            .with_context(|| format!("failed to replace mirror {:?}", self.path))?;

        trace!(path = %self.path.display(), lines = snapshot.lines.len(), "cart mirrored");
        Ok(())
    }

    /// Reads the mirrored snapshot, or `None` when nothing was mirrored yet.
    pub fn load(&self) -> Result<Option<CartSnapshot>> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read mirror {:?}", self.path));
            }
        };
        let snapshot = serde_json::from_slice(&contents)
            .with_context(|| format!("failed to decode mirror {:?}", self.path))?;
        Ok(Some(snapshot))
    }

    /// Removes the mirror file. A missing file is not an error.
    pub fn discard(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "cart mirror discarded");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove mirror {:?}", self.path))
            }
        }
    }
}

impl CartObserver for FileMirror {
    fn cart_changed(&self, _operation: CartOperation, snapshot: &CartSnapshot) -> Result<()> {
        self.write(snapshot)
    }
}
