//! Record projection.
//!
//! Fetches the records a session edits and writes each one as a
//! pretty-printed JSON scratch file:
//! - one record: a single `redit-*.json` temporary file
//! - a whole table: a `redit-*` temporary directory holding `<id>.json`
//!   per record
//!
//! The projection owns the scratch root; dropping it removes every file.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tempfile::{TempDir, TempPath};

use crate::error::SessionError;
use crate::store::{Record, TableHandle};
use crate::writeback::Fingerprints;

const SCRATCH_PREFIX: &str = "redit-";
const EXTENSION: &str = "json";

/// The on-disk copy of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct ScratchFile {
    path: PathBuf,
    id: Value,
}

impl ScratchFile {
    pub const fn new(path: PathBuf, id: Value) -> Self {
        Self { path, id }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The id of the record this file was projected from.
    pub const fn id(&self) -> &Value {
        &self.id
    }
}

/// The temporary file or directory holding every scratch file.
#[derive(Debug)]
pub enum ScratchRoot {
    File(TempPath),
    Dir(TempDir),
}

impl ScratchRoot {
    pub fn path(&self) -> &Path {
        match self {
            Self::File(path) => &**path,
            Self::Dir(dir) => dir.path(),
        }
    }

    /// Delete the root and everything under it.
    ///
    /// # Errors
    /// Returns an error if the filesystem refuses the removal.
    pub fn remove(self) -> std::io::Result<()> {
        match self {
            Self::File(path) => path.close(),
            Self::Dir(dir) => dir.close(),
        }
    }
}

/// Scratch files for one session.
#[derive(Debug)]
pub struct Projection {
    root: ScratchRoot,
    files: Vec<ScratchFile>,
    fingerprints: Fingerprints,
}

impl Projection {
    pub const fn root(&self) -> &ScratchRoot {
        &self.root
    }

    pub fn files(&self) -> &[ScratchFile] {
        &self.files
    }

    /// Content fingerprints as written, shared with write-back.
    pub const fn fingerprints(&self) -> &Fingerprints {
        &self.fingerprints
    }

    pub fn into_root(self) -> ScratchRoot {
        self.root
    }
}

/// Project one record (`id` given) or the whole table.
///
/// # Errors
/// Returns [`SessionError::NotFound`] when `id` names no record, in which
/// case nothing is written. Store, serialization and filesystem failures
/// are fatal as well.
pub fn project(table: &TableHandle, id: Option<&str>) -> Result<Projection, SessionError> {
    match id {
        Some(id) => project_one(table, id),
        None => project_all(table),
    }
}

fn project_one(table: &TableHandle, id: &str) -> Result<Projection, SessionError> {
    let requested = Value::String(id.to_string());
    let Some(record) = table.get(&requested)? else {
        let binding = table.binding();
        return Err(SessionError::NotFound {
            database: binding.database.clone(),
            table: binding.table.clone(),
            id: id.to_string(),
        });
    };
    let text = render(&record)?;

    let mut file = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .suffix(&format!(".{EXTENSION}"))
        .tempfile()
        .map_err(|err| SessionError::projection_io("cannot create scratch file", err))?;
    file.write_all(text.as_bytes())
        .and_then(|()| file.flush())
        .map_err(|err| SessionError::projection_io("cannot write scratch file", err))?;
    // Close our handle so editors that replace the file are not fighting it.
    let path = file.into_temp_path();

    let fingerprints = Fingerprints::default();
    fingerprints.record(&path, text.as_bytes());
    let scratch = ScratchFile::new(path.to_path_buf(), record.id().cloned().unwrap_or(requested));
    tracing::info!(path = %path.display(), id = %scratch.id(), "projected record");

    Ok(Projection {
        root: ScratchRoot::File(path),
        files: vec![scratch],
        fingerprints,
    })
}

fn project_all(table: &TableHandle) -> Result<Projection, SessionError> {
    let records = table.all()?;
    let dir = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir()
        .map_err(|err| SessionError::projection_io("cannot create scratch directory", err))?;

    let fingerprints = Fingerprints::default();
    let mut stems = HashSet::with_capacity(records.len());
    let mut files = Vec::with_capacity(records.len());
    for record in &records {
        let id = record
            .id()
            .ok_or_else(|| SessionError::projection("record without an id"))?;
        let stem = file_stem(id)
            .ok_or_else(|| SessionError::projection(format!("id {id} cannot be used as a file name")))?;
        if !stems.insert(stem.clone()) {
            return Err(SessionError::projection(format!(
                "more than one record maps to {stem}.{EXTENSION}"
            )));
        }

        let path = dir.path().join(format!("{stem}.{EXTENSION}"));
        let text = render(record)?;
        fs::write(&path, &text).map_err(|err| {
            SessionError::projection_io(format!("cannot write {}", path.display()), err)
        })?;
        fingerprints.record(&path, text.as_bytes());
        files.push(ScratchFile::new(path, id.clone()));
    }

    tracing::info!(
        dir = %dir.path().display(),
        records = files.len(),
        "projected table"
    );
    Ok(Projection {
        root: ScratchRoot::Dir(dir),
        files,
        fingerprints,
    })
}

/// Serialize a record the way scratch files hold it: two-space indented
/// JSON with a trailing newline.
///
/// # Errors
/// Returns an error if the record cannot be serialized.
pub fn render(record: &Record) -> Result<String, SessionError> {
    let mut text = serde_json::to_string_pretty(record)
        .map_err(|err| SessionError::projection(format!("cannot serialize record: {err}")))?;
    text.push('\n');
    Ok(text)
}

/// File name (without extension) for a record id: strings verbatim, other
/// ids as compact JSON. `None` when the result is not a safe single path
/// component.
pub fn file_stem(id: &Value) -> Option<String> {
    let stem = match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let unsafe_stem = stem.is_empty()
        || stem == "."
        || stem == ".."
        || stem.contains(['/', '\\', '\0']);
    (!unsafe_stem).then_some(stem)
}
