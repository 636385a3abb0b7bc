//! Record storage.
//!
//! This module handles:
//! - The [`Record`] value every other module passes around
//! - The [`RecordStore`] seam between the session and a database client
//! - Scoping a store to one [`TableBinding`] through [`TableHandle`]
//!
//! [`rethink`] is the network client used by the binary; [`memory`] keeps
//! tables in process.

pub mod memory;
pub mod rethink;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use memory::MemoryStore;
pub use rethink::{RethinkConnection, RethinkConnector};

/// Name of the primary key field.
pub const ID_FIELD: &str = "id";

/// Errors reported by a [`RecordStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("handshake rejected: {0}")]
    Handshake(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] rethink::ScramError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{kind}: {message}")]
    Query { kind: &'static str, message: String },

    #[error("write rejected: {0}")]
    Write(String),

    #[error("connection is closed")]
    Closed,

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One document: a JSON object keyed by its `id` field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Wrap a JSON value, handing it back unchanged if it is not an object.
    ///
    /// # Errors
    /// Returns the original value when it is not a JSON object.
    pub fn from_value(value: Value) -> Result<Self, Value> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(other),
        }
    }

    pub fn id(&self) -> Option<&Value> {
        self.0.get(ID_FIELD)
    }

    pub fn set_id(&mut self, id: Value) {
        self.0.insert(ID_FIELD.to_string(), id);
    }

    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// The (database, table) pair a session edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableBinding {
    pub database: String,
    pub table: String,
}

impl TableBinding {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

/// Database operations a session needs.
///
/// Implementations serialize their own wire traffic; callers share one
/// store across threads without extra locking.
pub trait RecordStore: Send + Sync {
    /// Fetch one record by primary key.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn get(&self, table: &TableBinding, id: &Value) -> Result<Option<Record>, StoreError>;

    /// Fetch every record in the table.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    fn all(&self, table: &TableBinding) -> Result<Vec<Record>, StoreError>;

    /// Upsert `record`, discarding whatever was stored under its id.
    ///
    /// # Errors
    /// Returns an error if the write is rejected or the query fails.
    fn replace(&self, table: &TableBinding, record: &Record) -> Result<(), StoreError>;

    /// Release the connection. Calling it twice is harmless.
    ///
    /// # Errors
    /// Returns an error if the underlying transport fails to shut down.
    fn close(&self) -> Result<(), StoreError>;
}

/// A store scoped to one table.
#[derive(Clone)]
pub struct TableHandle {
    store: Arc<dyn RecordStore>,
    binding: TableBinding,
}

impl TableHandle {
    pub fn new(store: Arc<dyn RecordStore>, binding: TableBinding) -> Self {
        Self { store, binding }
    }

    pub const fn binding(&self) -> &TableBinding {
        &self.binding
    }

    /// # Errors
    /// Propagates the store's error.
    pub fn get(&self, id: &Value) -> Result<Option<Record>, StoreError> {
        self.store.get(&self.binding, id)
    }

    /// # Errors
    /// Propagates the store's error.
    pub fn all(&self) -> Result<Vec<Record>, StoreError> {
        self.store.all(&self.binding)
    }

    /// # Errors
    /// Propagates the store's error.
    pub fn replace(&self, record: &Record) -> Result<(), StoreError> {
        self.store.replace(&self.binding, record)
    }
}

impl fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableHandle")
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub timeout: Duration,
}

impl ConnectOptions {
    pub const DEFAULT_HOST: &str = "localhost";
    pub const DEFAULT_PORT: u16 = 28015;
    pub const DEFAULT_USER: &str = "admin";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: Self::DEFAULT_HOST.to_string(),
            port: Self::DEFAULT_PORT,
            user: Self::DEFAULT_USER.to_string(),
            password: String::new(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

/// Opens the store a session works against.
pub trait Connector {
    /// # Errors
    /// Returns an error if the database cannot be reached or refuses the login.
    fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn RecordStore>, StoreError>;
}

impl<F> Connector for F
where
    F: Fn(&ConnectOptions) -> Result<Arc<dyn RecordStore>, StoreError>,
{
    fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn RecordStore>, StoreError> {
        self(options)
    }
}
