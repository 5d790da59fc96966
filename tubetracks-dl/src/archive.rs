//! Download archive
//!
//! Persisted set of completed [`JobId`]s, one per line. Blank lines and lines
//! starting with `#` are ignored; malformed lines are skipped with a warning.
//!
//! Membership only grows. When the store is attached to a file, every newly
//! recorded id is appended immediately so an interrupted run keeps its
//! progress; [`ArchiveStore::flush`] rewrites the file if an append failed.

use crate::error::StorageError;
use crate::job::JobId;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const HEADER: &str = "# tubetracks download archive";

/// Archive shared between workers; `record` is serialized by the mutex
pub type SharedArchive = Arc<tokio::sync::Mutex<ArchiveStore>>;

#[derive(Debug, Default)]
pub struct ArchiveStore {
    ids: HashSet<JobId>,
    path: Option<PathBuf>,
    /// Attached file exists and lacks a trailing newline
    needs_newline: bool,
    /// An incremental append failed; the file is behind memory
    dirty: bool,
}

impl ArchiveStore {
    /// Empty, in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the archive at `path` and attach to it for incremental appends
    ///
    /// A missing file yields an empty store (created on first record).
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                debug!(path = %path.display(), "No archive yet, starting empty");
                return Ok(Self {
                    path: Some(path.to_path_buf()),
                    ..Self::default()
                });
            }
            Err(source) => {
                return Err(StorageError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let ids = parse_ids(&content, path);
        info!(path = %path.display(), entries = ids.len(), "Loaded download archive");

        Ok(Self {
            ids,
            path: Some(path.to_path_buf()),
            needs_newline: !content.is_empty() && !content.ends_with('\n'),
            dirty: false,
        })
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.ids.contains(id)
    }

    /// Add `id`; returns false if it was already present
    ///
    /// Append failures are logged, never returned: the id stays recorded in
    /// memory and is written by the next [`flush`](Self::flush).
    pub fn record(&mut self, id: &JobId) -> bool {
        if !self.ids.insert(id.clone()) {
            return false;
        }

        if let Some(path) = self.path.clone() {
            if let Err(e) = self.append(&path, id) {
                warn!(
                    path = %path.display(),
                    job_id = %id,
                    error = %e,
                    "Failed to append to download archive"
                );
                self.dirty = true;
            }
        }
        true
    }

    /// Write the full set to `path`, merged with whatever the file already holds
    ///
    /// Written to a temporary sibling and renamed into place.
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        let write_err = |source| StorageError::Write {
            path: path.to_path_buf(),
            source,
        };

        let on_disk = match std::fs::read_to_string(path) {
            Ok(content) => parse_ids(&content, path),
            Err(e) if e.kind() == IoErrorKind::NotFound => HashSet::new(),
            Err(source) => {
                return Err(StorageError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let mut merged: Vec<&JobId> = self.ids.iter().collect();
        merged.extend(on_disk.iter().filter(|id| !self.ids.contains(*id)));
        merged.sort();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        let mut body = String::with_capacity(HEADER.len() + 1 + merged.len() * (JobId::LEN + 1));
        body.push_str(HEADER);
        body.push('\n');
        for id in &merged {
            body.push_str(id.as_str());
            body.push('\n');
        }

        let tmp = temp_path(path);
        std::fs::write(&tmp, body).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            write_err(e)
        })?;

        debug!(path = %path.display(), entries = merged.len(), "Saved download archive");
        Ok(())
    }

    /// Rewrite the attached file if any incremental append was lost
    pub fn flush(&mut self) -> Result<(), StorageError> {
        match &self.path {
            Some(path) if self.dirty => {
                self.save(path)?;
                self.dirty = false;
                self.needs_newline = false;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn into_shared(self) -> SharedArchive {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    fn append(&mut self, path: &Path, id: &JobId) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if self.needs_newline {
            file.write_all(b"\n")?;
            self.needs_newline = false;
        }
        writeln!(file, "{}", id)
    }
}

fn parse_ids(content: &str, path: &Path) -> HashSet<JobId> {
    let mut ids = HashSet::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match JobId::parse(line) {
            Some(id) => {
                ids.insert(id);
            }
            None => warn!(
                path = %path.display(),
                line = index + 1,
                "Skipping malformed archive entry"
            ),
        }
    }
    ids
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    path.with_file_name(format!(".{}.tmp", name))
}
