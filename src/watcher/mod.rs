//! Change detection for scratch files.
//!
//! Uses notify's polling backend with content comparison, so a file the
//! editor replaces through rename is seen the same as one written in place.
//!
//! At most [`MAX_CONCURRENT_WRITE_BACKS`] handler threads run at once.
//! Changes seen while every slot is busy wait in a queue (one entry per
//! file) and are picked up by the next thread to finish.
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use notify::{Config, Event, EventKind, PollWatcher, RecursiveMode, Watcher};

use crate::projector::ScratchFile;

/// Upper bound on write-back threads alive at the same time.
pub const MAX_CONCURRENT_WRITE_BACKS: usize = 8;

/// Called once per detected change, on a write-back thread.
pub type ChangeHandler = Arc<dyn Fn(&ScratchFile) + Send + Sync>;

struct Shared {
    files: HashMap<PathBuf, ScratchFile>,
    stopped: AtomicBool,
    in_flight: AtomicUsize,
    queue: Mutex<VecDeque<ScratchFile>>,
}

impl Shared {
    fn new(files: &[ScratchFile]) -> Self {
        let mut by_path = HashMap::with_capacity(files.len() * 2);
        for file in files {
            // Backends may report either the path we watched or its
            // canonical form (/var vs /private/var on macOS).
            if let Ok(canonical) = file.path().canonicalize() {
                by_path.insert(canonical, file.clone());
            }
            by_path.insert(file.path().to_path_buf(), file.clone());
        }
        Self {
            files: by_path,
            stopped: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    fn lookup(&self, path: &Path) -> Option<&ScratchFile> {
        self.files.get(path)
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<ScratchFile>> {
        match self.queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Take a thread slot for `file`, or queue it when every slot is busy.
    /// Returns true when the caller should start a thread.
    fn admit(&self, file: &ScratchFile) -> bool {
        let mut queue = self.lock_queue();
        if self.in_flight.load(Ordering::SeqCst) < MAX_CONCURRENT_WRITE_BACKS {
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            return true;
        }
        if !queue.iter().any(|queued| queued.path() == file.path()) {
            queue.push_back(file.clone());
        }
        tracing::debug!(
            path = %file.path().display(),
            queued = queue.len(),
            "write-back slots busy, change queued"
        );
        false
    }

    /// Hand a finishing thread its next queued file, or give its slot back.
    fn next_or_release(&self) -> Option<ScratchFile> {
        let mut queue = self.lock_queue();
        let next = queue.pop_front();
        if next.is_none() {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        next
    }

    fn release(&self) {
        let _queue = self.lock_queue();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Watches a fixed set of scratch files and fires a handler per change.
pub struct ChangeWatcher {
    watcher: Option<PollWatcher>,
    watched: Vec<PathBuf>,
    shared: Arc<Shared>,
}

impl ChangeWatcher {
    /// Start polling every file in `files`.
    ///
    /// # Errors
    /// Returns an error if the watcher cannot be created or a file cannot be watched.
    pub fn start(
        files: &[ScratchFile],
        poll_interval: Duration,
        on_change: ChangeHandler,
    ) -> notify::Result<Self> {
        let shared = Arc::new(Shared::new(files));
        let dispatch_shared = Arc::clone(&shared);
        let config = Config::default()
            .with_poll_interval(poll_interval)
            .with_compare_contents(true);
        let mut watcher = PollWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => dispatch(&dispatch_shared, &on_change, &event),
                Err(err) => tracing::warn!(error = %err, "watcher error"),
            },
            config,
        )?;

        let mut watched = Vec::with_capacity(files.len());
        for file in files {
            watcher.watch(file.path(), RecursiveMode::NonRecursive)?;
            watched.push(file.path().to_path_buf());
        }
        tracing::debug!(files = watched.len(), ?poll_interval, "watching scratch files");

        Ok(Self {
            watcher: Some(watcher),
            watched,
            shared,
        })
    }

    /// Write-backs dispatched but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Stop polling. Handlers already running are not waited for; ones that
    /// have not started yet skip their work.
    ///
    /// # Errors
    /// Returns the first error from unwatching a path. The watcher is
    /// dropped regardless.
    pub fn stop(&mut self) -> notify::Result<()> {
        self.shared.stopped.store(true, Ordering::SeqCst);
        let Some(mut watcher) = self.watcher.take() else {
            return Ok(());
        };
        let mut first_error = None;
        for path in self.watched.drain(..) {
            if let Err(err) = watcher.unwatch(&path) {
                first_error.get_or_insert(err);
            }
        }
        drop(watcher);
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

fn dispatch(shared: &Arc<Shared>, on_change: &ChangeHandler, event: &Event) {
    if !is_content_change(&event.kind) {
        tracing::trace!(kind = ?event.kind, paths = ?event.paths, "ignoring event");
        return;
    }
    for path in &event.paths {
        let Some(file) = shared.lookup(path) else {
            tracing::trace!(path = %path.display(), "event outside scratch set");
            continue;
        };
        tracing::debug!(path = %path.display(), kind = ?event.kind, "scratch file changed");

        if !shared.admit(file) {
            continue;
        }

        let handler = Arc::clone(on_change);
        let task_shared = Arc::clone(shared);
        let first = file.clone();
        let spawned = thread::Builder::new()
            .name("redit-write-back".to_string())
            .spawn(move || {
                let mut next = Some(first);
                while let Some(file) = next {
                    if task_shared.stopped.load(Ordering::SeqCst) {
                        tracing::debug!(path = %file.path().display(), "watcher stopped, skipping write-back");
                    } else {
                        handler(&file);
                    }
                    next = task_shared.next_or_release();
                }
            });
        if let Err(err) = spawned {
            shared.release();
            tracing::error!(path = %path.display(), error = %err, "cannot start write-back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Instant;

    use notify::event::{AccessKind, CreateKind, EventAttributes, ModifyKind, RemoveKind};
    use serde_json::json;
    use tempfile::tempdir;

    fn channel_handler() -> (ChangeHandler, mpsc::Receiver<ScratchFile>) {
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let handler: ChangeHandler = Arc::new(move |file: &ScratchFile| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(file.clone());
            }
        });
        (handler, rx)
    }

    fn event(kind: EventKind, path: &Path) -> Event {
        Event {
            kind,
            paths: vec![path.to_path_buf()],
            attrs: EventAttributes::new(),
        }
    }

    #[test]
    fn test_only_create_and_modify_count_as_changes() {
        assert!(is_content_change(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_content_change(&EventKind::Create(CreateKind::File)));
        assert!(!is_content_change(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_content_change(&EventKind::Access(AccessKind::Any)));
    }

    #[test]
    fn test_dispatch_ignores_paths_outside_scratch_set() {
        let dir = tempdir().expect("tempdir");
        let watched = dir.path().join("1.json");
        std::fs::write(&watched, "{}").expect("write");
        let shared = Arc::new(Shared::new(&[ScratchFile::new(watched.clone(), json!("1"))]));
        let (handler, rx) = channel_handler();

        dispatch(&shared, &handler, &event(EventKind::Modify(ModifyKind::Any), &dir.path().join("other.json")));
        dispatch(&shared, &handler, &event(EventKind::Remove(RemoveKind::File), &watched));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        dispatch(&shared, &handler, &event(EventKind::Modify(ModifyKind::Any), &watched));
        let fired = rx.recv_timeout(Duration::from_secs(2)).expect("handler should fire");
        assert_eq!(fired.id(), &json!("1"));
    }

    #[test]
    fn test_dispatch_after_stop_skips_handler() {
        let dir = tempdir().expect("tempdir");
        let watched = dir.path().join("1.json");
        std::fs::write(&watched, "{}").expect("write");
        let shared = Arc::new(Shared::new(&[ScratchFile::new(watched.clone(), json!("1"))]));
        shared.stopped.store(true, Ordering::SeqCst);
        let (handler, rx) = channel_handler();

        dispatch(&shared, &handler, &event(EventKind::Modify(ModifyKind::Any), &watched));
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_write_backs_beyond_the_cap_are_queued() {
        let dir = tempdir().expect("tempdir");
        let files: Vec<ScratchFile> = (0..MAX_CONCURRENT_WRITE_BACKS + 4)
            .map(|i| {
                let path = dir.path().join(format!("{i}.json"));
                std::fs::write(&path, "{}").expect("write");
                ScratchFile::new(path, json!(i.to_string()))
            })
            .collect();
        let shared = Arc::new(Shared::new(&files));

        let gate = Arc::new(AtomicBool::new(false));
        let handler_gate = Arc::clone(&gate);
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let handler: ChangeHandler = Arc::new(move |file: &ScratchFile| {
            while !handler_gate.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(10));
            }
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(file.path().to_path_buf());
            }
        });

        for file in &files {
            dispatch(&shared, &handler, &event(EventKind::Modify(ModifyKind::Any), file.path()));
        }
        // A second change to a file already waiting is folded into its entry.
        let last = files.last().expect("files");
        dispatch(&shared, &handler, &event(EventKind::Modify(ModifyKind::Any), last.path()));

        assert_eq!(shared.in_flight.load(Ordering::SeqCst), MAX_CONCURRENT_WRITE_BACKS);
        assert_eq!(shared.lock_queue().len(), 4);

        gate.store(true, Ordering::SeqCst);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..files.len() {
            let path = rx.recv_timeout(Duration::from_secs(5)).expect("queued change handled");
            seen.insert(path);
        }
        assert_eq!(seen.len(), files.len());
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

        let deadline = Instant::now() + Duration::from_secs(5);
        while shared.in_flight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(shared.in_flight.load(Ordering::SeqCst), 0);
        assert!(shared.lock_queue().is_empty());
    }

    #[test]
    fn test_real_file_modification_detected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("1.json");
        std::fs::write(&path, r#"{"id": "1"}"#).expect("write");
        let (handler, rx) = channel_handler();
        let mut watcher = ChangeWatcher::start(
            &[ScratchFile::new(path.clone(), json!("1"))],
            Duration::from_millis(50),
            handler,
        )
        .expect("watcher");

        std::thread::sleep(Duration::from_millis(200));
        std::fs::write(&path, r#"{"id": "1", "name": "edited"}"#).expect("write");

        let fired = rx.recv_timeout(Duration::from_secs(5));
        assert!(fired.is_ok(), "watcher should detect modification within 5 seconds");
        watcher.stop().expect("stop");
    }

    /// Editors like vim save by writing a new file and renaming it over the old one.
    #[test]
    fn test_atomic_replace_detected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("1.json");
        std::fs::write(&path, r#"{"id": "1"}"#).expect("write");
        let (handler, rx) = channel_handler();
        let _watcher = ChangeWatcher::start(
            &[ScratchFile::new(path.clone(), json!("1"))],
            Duration::from_millis(50),
            handler,
        )
        .expect("watcher");

        std::thread::sleep(Duration::from_millis(200));
        let replacement = dir.path().join(".1.json.swp");
        std::fs::write(&replacement, r#"{"id": "1", "name": "replaced"}"#).expect("write");
        std::fs::rename(&replacement, &path).expect("rename");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut detected = false;
        while Instant::now() < deadline {
            if let Ok(file) = rx.recv_timeout(Duration::from_millis(100)) {
                assert_eq!(file.path(), path.as_path());
                detected = true;
                break;
            }
        }
        assert!(detected, "watcher should see content replaced via rename");
    }

    #[test]
    fn test_stop_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("1.json");
        std::fs::write(&path, "{}").expect("write");
        let (handler, _rx) = channel_handler();
        let mut watcher = ChangeWatcher::start(
            &[ScratchFile::new(path, json!("1"))],
            Duration::from_millis(50),
            handler,
        )
        .expect("watcher");

        watcher.stop().expect("first stop");
        watcher.stop().expect("second stop");
        assert_eq!(watcher.in_flight(), 0);
    }
}
