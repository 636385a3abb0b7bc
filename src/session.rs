//! One editing session, start to finish.
//!
//! A session walks a single path of phases:
//!
//! ```text
//! Validating → Connecting → Projecting → Watching → Editing → TearingDown → Closed
//! ```
//!
//! Any failure before `TearingDown` jumps straight there. Teardown is
//! unconditional: it runs once on every exit path, including drop, and
//! never raises.

use std::fmt;
use std::process::{Child, ExitStatus};
use std::sync::Arc;

use crate::config::{SessionConfig, SessionInputs};
use crate::console::Console;
use crate::error::SessionError;
use crate::projector::{self, Projection, ScratchFile};
use crate::store::{Connector, RecordStore, TableHandle};
use crate::watcher::{ChangeHandler, ChangeWatcher};
use crate::writeback::WriteBack;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validating,
    Connecting,
    Projecting,
    Watching,
    Editing,
    TearingDown,
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::Connecting => "connecting",
            Self::Projecting => "projecting",
            Self::Watching => "watching",
            Self::Editing => "editing",
            Self::TearingDown => "tearing down",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Validate `inputs`, then run a whole session against the store
/// `connector` opens.
///
/// Returns the editor's exit status; a non-zero status is not an error.
///
/// # Errors
/// Returns the first fatal error. Resources acquired before it are
/// released before this returns.
pub fn run(
    inputs: SessionInputs,
    connector: &dyn Connector,
    console: Console,
) -> Result<ExitStatus, SessionError> {
    tracing::debug!(phase = %Phase::Validating, "session starting");
    let config = inputs.validate().inspect_err(|err| {
        tracing::debug!(error = %err, phase = %Phase::Closed, "validation failed");
    })?;
    let mut session = Session::new(config, console);
    let outcome = session.drive(connector);
    session.teardown();
    outcome
}

/// Live resources of one session. Every field is released by
/// [`Session::teardown`].
pub struct Session {
    config: SessionConfig,
    console: Console,
    phase: Phase,
    store: Option<Arc<dyn RecordStore>>,
    projection: Option<Projection>,
    watcher: Option<ChangeWatcher>,
    editor: Option<Child>,
}

impl Session {
    pub const fn new(config: SessionConfig, console: Console) -> Self {
        Self {
            config,
            console,
            phase: Phase::Validating,
            store: None,
            projection: None,
            watcher: None,
            editor: None,
        }
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(from = %self.phase, to = %phase, "session phase");
        self.phase = phase;
    }

    /// Connecting through Editing. Stops at the first error, leaving
    /// whatever was acquired for teardown.
    fn drive(&mut self, connector: &dyn Connector) -> Result<ExitStatus, SessionError> {
        self.enter(Phase::Connecting);
        let store = connector
            .connect(&self.config.connect)
            .map_err(|source| SessionError::Connection {
                address: self.config.connect.address(),
                source,
            })?;
        self.store = Some(Arc::clone(&store));
        let table = TableHandle::new(store, self.config.binding.clone());

        self.enter(Phase::Projecting);
        let projection = self
            .projection
            .insert(projector::project(&table, self.config.record_id.as_deref())?);
        let files = projection.files().to_vec();
        let root = projection.root().path().to_path_buf();
        let writeback = WriteBack::new(table, projection.fingerprints().clone(), self.console);

        self.enter(Phase::Watching);
        let handler_writeback = writeback.clone();
        let handler: ChangeHandler =
            Arc::new(move |file: &ScratchFile| handler_writeback.handle(file));
        self.watcher = Some(ChangeWatcher::start(
            &files,
            self.config.poll_interval,
            handler,
        )?);

        self.enter(Phase::Editing);
        let status = self.config.editor.run(&root, &mut self.editor)?;
        writeback.sweep(&files);
        Ok(status)
    }

    /// Release everything. Each step is attempted even if an earlier one
    /// failed; failures are logged and swallowed. Safe to call twice.
    pub fn teardown(&mut self) {
        if matches!(self.phase, Phase::TearingDown | Phase::Closed) {
            return;
        }
        self.enter(Phase::TearingDown);

        if let Some(mut watcher) = self.watcher.take() {
            let in_flight = watcher.in_flight();
            if in_flight > 0 {
                tracing::debug!(in_flight, "stopping watcher with write-backs in flight");
            }
            if let Err(err) = watcher.stop() {
                tracing::warn!(error = %err, "failed to stop watcher");
            }
        }

        if let Some(projection) = self.projection.take() {
            let root = projection.into_root();
            let path = root.path().to_path_buf();
            if let Err(err) = root.remove() {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove scratch files");
            }
        }

        if let Some(store) = self.store.take() {
            if let Err(err) = store.close() {
                tracing::warn!(error = %err, "failed to close database connection");
            }
        }

        if let Some(mut child) = self.editor.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => {
                    tracing::debug!(pid = child.id(), "killing editor");
                    if let Err(err) = child.kill().and_then(|()| child.wait().map(drop)) {
                        tracing::warn!(error = %err, "failed to kill editor");
                    }
                }
            }
        }

        self.enter(Phase::Closed);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("binding", &self.config.binding)
            .field("phase", &self.phase)
            .field("connected", &self.store.is_some())
            .field("projected", &self.projection.is_some())
            .field("watching", &self.watcher.is_some())
            .field("editor", &self.editor.as_ref().map(Child::id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::config::ConfigFlags;
    use crate::store::{ConnectOptions, MemoryStore, Record, StoreError, TableBinding};

    fn inputs(record_id: Option<&str>, editor: &str) -> SessionInputs {
        SessionInputs {
            database: Some("mydb".to_string()),
            table: Some("users".to_string()),
            record_id: record_id.map(str::to_string),
            editor: Some(editor.to_string()),
            flags: ConfigFlags {
                poll_interval_ms: Some(20),
                ..ConfigFlags::default()
            },
        }
    }

    fn users_store() -> Arc<MemoryStore> {
        Arc::new(MemoryStore::with_records(
            &TableBinding::new("mydb", "users"),
            [
                Record::from_value(json!({"id": "1", "name": "Alice"})).unwrap(),
                Record::from_value(json!({"id": "2", "name": "Bob"})).unwrap(),
            ],
        ))
    }

    #[test]
    fn test_validation_failure_never_connects() {
        let connector = |_: &ConnectOptions| -> Result<Arc<dyn RecordStore>, StoreError> {
            panic!("must not connect without an editor")
        };
        let mut no_editor = inputs(None, "vim");
        no_editor.editor = None;
        assert!(matches!(
            run(no_editor, &connector, Console::plain()),
            Err(SessionError::MissingEditor)
        ));
    }

    #[test]
    fn test_connection_failure_is_fatal() {
        let connector = |_: &ConnectOptions| -> Result<Arc<dyn RecordStore>, StoreError> {
            Err(StoreError::Closed)
        };
        let err = run(inputs(None, "true"), &connector, Console::plain()).unwrap_err();
        assert!(matches!(err, SessionError::Connection { ref address, .. } if address == "localhost:28015"));
    }

    #[test]
    fn test_not_found_closes_store_and_skips_editor() {
        let store = users_store();
        let handle = Arc::clone(&store);
        let connector = move |_: &ConnectOptions| -> Result<Arc<dyn RecordStore>, StoreError> {
            Ok(handle.clone())
        };
        let err = run(
            inputs(Some("9"), "redit-no-such-editor-binary"),
            &connector,
            Console::plain(),
        )
        .unwrap_err();
        assert!(matches!(err, SessionError::NotFound { .. }));
        assert!(store.is_closed());
    }

    #[test]
    fn test_spawn_failure_tears_down_projection() {
        let store = users_store();
        let handle = Arc::clone(&store);
        let connector = move |_: &ConnectOptions| -> Result<Arc<dyn RecordStore>, StoreError> {
            Ok(handle.clone())
        };
        let config = inputs(None, "redit-no-such-editor-binary").validate().unwrap();
        let mut session = Session::new(config, Console::plain());

        let err = session.drive(&connector).unwrap_err();
        assert!(matches!(err, SessionError::Spawn { .. }));
        let root = session
            .projection
            .as_ref()
            .map(|p| p.root().path().to_path_buf())
            .expect("projection exists until teardown");
        assert!(root.exists());

        session.teardown();
        assert_eq!(session.phase(), Phase::Closed);
        assert!(!root.exists());
        assert!(store.is_closed());
        session.teardown();
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_editor_exit_still_cleans_up() {
        let store = users_store();
        let handle = Arc::clone(&store);
        let connector = move |_: &ConnectOptions| -> Result<Arc<dyn RecordStore>, StoreError> {
            Ok(handle.clone())
        };
        let status = run(inputs(Some("1"), "false"), &connector, Console::plain()).unwrap();
        assert!(!status.success());
        assert!(store.is_closed());
        assert_eq!(store.write_count(), 0);
    }
}
