//! Error types for a redit session.
//!
//! [`SessionError`] is fatal: it ends the session and the process exits 1.
//! [`WriteBackError`] is local to one change event and never stops the
//! watcher or the editor.

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

use crate::store::StoreError;

/// Fatal errors raised between validation and the end of editing.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Missing database or table argument.
    #[error("Usage: redit <db> <tbl> [<id>]")]
    Usage,

    /// `$EDITOR` unset or blank.
    #[error("Looks like $EDITOR is missing. Try 'export EDITOR=vim'")]
    MissingEditor,

    #[error("Failed to connect to {address}: {source}")]
    Connection { address: String, source: StoreError },

    #[error("Record {table}:{id} not found in database {database}")]
    NotFound {
        database: String,
        table: String,
        id: String,
    },

    #[error("Failed to fetch records: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to project records: {message}")]
    Projection {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Failed to watch scratch files: {0}")]
    Watch(#[from] notify::Error),

    #[error("Failed to launch editor '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Lost track of editor process: {0}")]
    EditorWait(std::io::Error),
}

impl SessionError {
    pub(crate) fn projection(message: impl Into<String>) -> Self {
        Self::Projection {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn projection_io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Projection {
            message: message.into(),
            source: Some(source),
        }
    }
}

/// Recoverable errors raised while writing one scratch file back.
#[derive(Debug, Error)]
pub enum WriteBackError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid JSON in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{} must contain a JSON object, not {kind}", .path.display())]
    NotAnObject { path: PathBuf, kind: &'static str },

    /// The edited content names a different record than the file was
    /// projected from. Nothing is written.
    #[error("Refusing to save {}: id changed from {expected} to {found}", .path.display())]
    IdentifierChanged {
        path: PathBuf,
        expected: Value,
        found: Value,
    },

    #[error("Failed to save record {id}: {source}")]
    Store { id: Value, source: StoreError },
}
