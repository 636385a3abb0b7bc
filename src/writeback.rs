//! Writing edited scratch files back to the database.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::console::Console;
use crate::error::WriteBackError;
use crate::projector::ScratchFile;
use crate::store::{Record, TableHandle};

/// SHA-256 of the content last projected or saved, per scratch file.
#[derive(Debug, Clone, Default)]
pub struct Fingerprints {
    inner: Arc<Mutex<HashMap<PathBuf, [u8; 32]>>>,
}

impl Fingerprints {
    pub fn record(&self, path: &Path, content: &[u8]) {
        self.lock().insert(path.to_path_buf(), digest(content));
    }

    /// True when `content` matches what was last projected or saved.
    pub fn is_current(&self, path: &Path, content: &[u8]) -> bool {
        self.lock()
            .get(path)
            .is_some_and(|known| *known == digest(content))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, [u8; 32]>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn digest(content: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(content));
    out
}

/// Parses scratch files and replaces the records they came from.
#[derive(Debug, Clone)]
pub struct WriteBack {
    table: TableHandle,
    fingerprints: Fingerprints,
    console: Console,
}

impl WriteBack {
    pub const fn new(table: TableHandle, fingerprints: Fingerprints, console: Console) -> Self {
        Self {
            table,
            fingerprints,
            console,
        }
    }

    /// Save `file` and report the outcome on the console.
    ///
    /// Failures are reported, never propagated: a bad edit only skips this
    /// event. Content identical to what was last projected or saved is
    /// skipped, so a `touch` or a save without edits writes nothing.
    pub fn handle(&self, file: &ScratchFile) {
        let content = match fs::read(file.path()) {
            Ok(content) => content,
            Err(source) => {
                self.fail(&WriteBackError::Read {
                    path: file.path().to_path_buf(),
                    source,
                });
                return;
            }
        };
        self.save_if_changed(file, &content);
    }

    /// Read, parse and save `file`, returning the id that was written.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is not a JSON object,
    /// names a different id than it was projected from, or the store
    /// rejects the write.
    pub fn apply(&self, file: &ScratchFile) -> Result<Value, WriteBackError> {
        let content = fs::read(file.path()).map_err(|source| WriteBackError::Read {
            path: file.path().to_path_buf(),
            source,
        })?;
        self.apply_content(file, &content)
    }

    /// Save every file whose content changed since it was last projected
    /// or saved. Used once the editor has exited, so a save made between
    /// two polls is not lost.
    pub fn sweep(&self, files: &[ScratchFile]) {
        for file in files {
            let content = match fs::read(file.path()) {
                Ok(content) => content,
                Err(err) => {
                    tracing::debug!(path = %file.path().display(), error = %err, "sweep skipped unreadable file");
                    continue;
                }
            };
            self.save_if_changed(file, &content);
        }
    }

    fn save_if_changed(&self, file: &ScratchFile, content: &[u8]) {
        if self.fingerprints.is_current(file.path(), content) {
            tracing::debug!(path = %file.path().display(), "content unchanged, skipping write-back");
            return;
        }
        match self.apply_content(file, content) {
            Ok(id) => self.confirm(&id),
            Err(err) => self.fail(&err),
        }
    }

    fn apply_content(&self, file: &ScratchFile, content: &[u8]) -> Result<Value, WriteBackError> {
        let value: Value =
            serde_json::from_slice(content).map_err(|source| WriteBackError::Parse {
                path: file.path().to_path_buf(),
                source,
            })?;
        let mut record = Record::from_value(value).map_err(|other| WriteBackError::NotAnObject {
            path: file.path().to_path_buf(),
            kind: kind_name(&other),
        })?;

        match record.id() {
            None => record.set_id(file.id().clone()),
            Some(found) if found != file.id() => {
                return Err(WriteBackError::IdentifierChanged {
                    path: file.path().to_path_buf(),
                    expected: file.id().clone(),
                    found: found.clone(),
                });
            }
            Some(_) => {}
        }

        self.table
            .replace(&record)
            .map_err(|source| WriteBackError::Store {
                id: file.id().clone(),
                source,
            })?;
        self.fingerprints.record(file.path(), content);
        tracing::debug!(path = %file.path().display(), id = %file.id(), "record replaced");
        Ok(file.id().clone())
    }

    fn confirm(&self, id: &Value) {
        self.console.updated(id, self.table.binding());
    }

    fn fail(&self, err: &WriteBackError) {
        tracing::error!(error = %err, "write-back failed");
        self.console.error(err);
    }
}

const fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    use crate::store::{MemoryStore, TableBinding};

    struct Fixture {
        store: Arc<MemoryStore>,
        binding: TableBinding,
        writeback: WriteBack,
        dir: tempfile::TempDir,
    }

    fn fixture(records: Vec<Value>) -> Fixture {
        let binding = TableBinding::new("mydb", "users");
        let store = Arc::new(MemoryStore::with_records(
            &binding,
            records.into_iter().map(|v| Record::from_value(v).unwrap()),
        ));
        let table = TableHandle::new(store.clone(), binding.clone());
        Fixture {
            store,
            binding,
            writeback: WriteBack::new(table, Fingerprints::default(), Console::plain()),
            dir: tempdir().expect("tempdir"),
        }
    }

    impl Fixture {
        fn scratch(&self, id: Value, content: &str) -> ScratchFile {
            let path = self.dir.path().join("scratch.json");
            fs::write(&path, content).expect("write");
            ScratchFile::new(path, id)
        }

        fn stored(&self, id: &Value) -> Value {
            self.store.record(&self.binding, id).unwrap().into_value()
        }
    }

    #[test]
    fn test_valid_edit_replaces_whole_record() {
        let fx = fixture(vec![json!({"id": "1", "name": "Alice", "age": 30})]);
        let file = fx.scratch(json!("1"), r#"{"id": "1", "name": "Alicia"}"#);

        assert_eq!(fx.writeback.apply(&file).unwrap(), json!("1"));
        assert_eq!(fx.stored(&json!("1")), json!({"id": "1", "name": "Alicia"}));
    }

    #[test]
    fn test_malformed_edit_leaves_record_untouched() {
        let fx = fixture(vec![json!({"id": "1", "name": "Alice"})]);
        let file = fx.scratch(json!("1"), r#"{"id": "1", "name": "#);

        assert!(matches!(
            fx.writeback.apply(&file),
            Err(WriteBackError::Parse { .. })
        ));
        fx.writeback.handle(&file);
        assert_eq!(fx.stored(&json!("1")), json!({"id": "1", "name": "Alice"}));
        assert_eq!(fx.store.write_count(), 0);
    }

    #[test]
    fn test_non_object_content_is_rejected() {
        let fx = fixture(vec![json!({"id": "1"})]);
        let file = fx.scratch(json!("1"), "[1, 2, 3]");
        assert!(matches!(
            fx.writeback.apply(&file),
            Err(WriteBackError::NotAnObject { kind: "an array", .. })
        ));
    }

    #[test]
    fn test_missing_id_falls_back_to_bound_id() {
        let fx = fixture(vec![json!({"id": "1", "name": "Alice"})]);
        let file = fx.scratch(json!("1"), r#"{"name": "Al"}"#);

        fx.writeback.apply(&file).unwrap();
        assert_eq!(fx.stored(&json!("1")), json!({"id": "1", "name": "Al"}));
    }

    #[test]
    fn test_changed_id_is_refused() {
        let fx = fixture(vec![json!({"id": "1", "name": "Alice"})]);
        let file = fx.scratch(json!("1"), r#"{"id": "2", "name": "Alice"}"#);

        assert!(matches!(
            fx.writeback.apply(&file),
            Err(WriteBackError::IdentifierChanged { .. })
        ));
        assert!(fx.store.record(&fx.binding, &json!("2")).is_none());
        assert_eq!(fx.store.write_count(), 0);
    }

    #[test]
    fn test_untouched_float_field_is_saved_unchanged() {
        let score = 958_787.270_229_118_9_f64;
        let fx = fixture(vec![json!({"id": "1", "name": "Alice", "score": score})]);
        let mut edited = fx.stored(&json!("1"));
        edited["name"] = json!("Alicia");
        let text = crate::projector::render(&Record::from_value(edited).unwrap()).unwrap();
        let file = fx.scratch(json!("1"), &text);

        fx.writeback.apply(&file).unwrap();
        let stored = fx.stored(&json!("1"));
        assert_eq!(stored["name"], json!("Alicia"));
        assert_eq!(stored["score"].as_f64().map(f64::to_bits), Some(score.to_bits()));
    }

    #[test]
    fn test_unchanged_content_event_writes_nothing() {
        let fx = fixture(vec![json!({"id": "1", "name": "Alice"})]);
        let file = fx.scratch(json!("1"), r#"{"id": "1", "name": "Alice"}"#);
        fx.writeback
            .fingerprints
            .record(file.path(), &fs::read(file.path()).unwrap());

        fx.writeback.handle(&file);
        assert_eq!(fx.store.write_count(), 0);

        fs::write(file.path(), r#"{"id": "1", "name": "Alicia"}"#).unwrap();
        fx.writeback.handle(&file);
        fx.writeback.handle(&file);
        assert_eq!(fx.store.write_count(), 1);
        assert_eq!(fx.stored(&json!("1")), json!({"id": "1", "name": "Alicia"}));
    }

    #[test]
    fn test_repeated_write_is_idempotent() {
        let fx = fixture(vec![json!({"id": "1", "name": "Alice"})]);
        let file = fx.scratch(json!("1"), r#"{"id": "1", "name": "Alicia"}"#);

        fx.writeback.apply(&file).unwrap();
        let once = fx.stored(&json!("1"));
        fx.writeback.apply(&file).unwrap();
        assert_eq!(fx.stored(&json!("1")), once);
    }

    #[test]
    fn test_store_failure_is_reported_not_raised() {
        let fx = fixture(vec![json!({"id": "1"})]);
        let file = fx.scratch(json!("1"), r#"{"id": "1", "x": 1}"#);
        crate::store::RecordStore::close(fx.store.as_ref()).unwrap();

        assert!(matches!(
            fx.writeback.apply(&file),
            Err(WriteBackError::Store { .. })
        ));
        fx.writeback.handle(&file);
    }

    #[test]
    fn test_sweep_saves_only_changed_files() {
        let fx = fixture(vec![json!({"id": "1", "name": "Alice"})]);
        let file = fx.scratch(json!("1"), r#"{"id": "1", "name": "Alice"}"#);
        fx.writeback
            .fingerprints
            .record(file.path(), &fs::read(file.path()).unwrap());

        fx.writeback.sweep(std::slice::from_ref(&file));
        assert_eq!(fx.store.write_count(), 0);

        fs::write(file.path(), r#"{"id": "1", "name": "Alicia"}"#).unwrap();
        fx.writeback.sweep(std::slice::from_ref(&file));
        assert_eq!(fx.store.write_count(), 1);
        assert_eq!(fx.stored(&json!("1")), json!({"id": "1", "name": "Alicia"}));

        fx.writeback.sweep(std::slice::from_ref(&file));
        assert_eq!(fx.store.write_count(), 1, "saved content is now current");
    }
}
