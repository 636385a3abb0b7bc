//! RethinkDB client.
//!
//! Speaks the V1_0 JSON wire protocol over one blocking TCP connection:
//! - [`scram`]: SCRAM-SHA-256 login
//! - [`term`]: ReQL terms and response decoding
//! - [`connection`]: framing, handshake and the [`RecordStore`] impl

mod connection;
mod scram;
mod term;

use std::sync::Arc;

pub use connection::RethinkConnection;
pub use scram::ScramError;

use super::{ConnectOptions, Connector, RecordStore, StoreError};

/// Opens a [`RethinkConnection`] for a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct RethinkConnector;

impl Connector for RethinkConnector {
    fn connect(&self, options: &ConnectOptions) -> Result<Arc<dyn RecordStore>, StoreError> {
        Ok(Arc::new(RethinkConnection::connect(options)?))
    }
}
