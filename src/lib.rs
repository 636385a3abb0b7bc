// Only allow lints that are either transitive-dependency noise or
// genuinely opinionated style choices that don't indicate real issues.
#![allow(
    // Transitive dependency version mismatches we can't control
    clippy::multiple_crate_versions,
    // module_name_repetitions is pure style preference (e.g. store::StoreError)
    clippy::module_name_repetitions
)]

//! # redit
//!
//! Edit database records as JSON files in your own `$EDITOR`.
//!
//! redit projects one record (or a whole table) into temporary JSON files,
//! opens them in the editor, and writes every save back to the database
//! while the editor is still running. When the editor exits the scratch
//! files are removed.
//!
//! ## Modules
//!
//! - [`session`]: Phase machine tying everything together
//! - [`projector`]: Records to scratch files
//! - [`watcher`]: Polling change detection
//! - [`writeback`]: Scratch files back to records
//! - [`editor`]: Running `$EDITOR`
//! - [`store`]: Storage seam, RethinkDB client, in-memory store
//! - [`config`]: Flags, defaults files and input validation
//! - [`console`]: Operator-facing output

pub mod config;
pub mod console;
pub mod editor;
pub mod error;
pub mod projector;
pub mod session;
pub mod store;
pub mod watcher;
pub mod writeback;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ConfigFlags, SessionConfig, SessionInputs};
    pub use crate::console::Console;
    pub use crate::error::{SessionError, WriteBackError};
    pub use crate::session::{Phase, Session};
    pub use crate::store::{MemoryStore, Record, RecordStore, RethinkConnector, TableBinding};
}
