use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Mutex, MutexGuard};

use serde::Deserialize;
use serde_json::{Value, json};

use super::scram::ScramClient;
use super::term::{self, Response, ResponseKind, WriteSummary};
use crate::store::{ConnectOptions, Record, RecordStore, StoreError, TableBinding};

/// Magic number announcing protocol V1_0.
const V1_0: u32 = 0x34c2_bdc3;

/// Largest handshake message we accept before giving up on the NUL.
const MAX_HANDSHAKE_MESSAGE: usize = 64 * 1024;

#[derive(Debug)]
struct Inner {
    stream: Option<TcpStream>,
    next_token: u64,
}

/// One authenticated connection to a RethinkDB server.
///
/// Queries hold the connection lock for their whole exchange, so concurrent
/// callers never interleave frames.
#[derive(Debug)]
pub struct RethinkConnection {
    inner: Mutex<Inner>,
    address: String,
}

#[derive(Debug, Deserialize)]
struct HandshakeReply {
    #[serde(default)]
    success: bool,
    authentication: Option<String>,
    error: Option<String>,
}

impl RethinkConnection {
    /// Connect and log in.
    ///
    /// # Errors
    /// Returns an error if no resolved address accepts the connection within
    /// the timeout, or the handshake fails.
    pub fn connect(options: &ConnectOptions) -> Result<Self, StoreError> {
        let address = options.address();
        let mut last_error = None;
        let mut stream = None;
        for addr in (options.host.as_str(), options.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, options.timeout) {
                Ok(connected) => {
                    stream = Some(connected);
                    break;
                }
                Err(err) => {
                    tracing::debug!(%addr, error = %err, "connect attempt failed");
                    last_error = Some(err);
                }
            }
        }
        let mut stream = match (stream, last_error) {
            (Some(stream), _) => stream,
            (None, Some(err)) => return Err(err.into()),
            (None, None) => {
                return Err(StoreError::Protocol(format!(
                    "{address} did not resolve to any address"
                )));
            }
        };
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(options.timeout))?;
        handshake(&mut stream, &ScramClient::new(&options.user, &options.password))?;
        stream.set_read_timeout(None)?;

        tracing::info!(%address, user = %options.user, "connected to rethinkdb");
        Ok(Self {
            inner: Mutex::new(Inner {
                stream: Some(stream),
                next_token: 1,
            }),
            address,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run `term` to completion and collect every result.
    fn run(&self, term: Value) -> Result<Vec<Value>, StoreError> {
        let mut inner = self.lock();
        let token = inner.next_token;
        inner.next_token += 1;
        let stream = inner.stream.as_mut().ok_or(StoreError::Closed)?;
        let outcome = drain(stream, token, &term::start(term));
        if matches!(outcome, Err(StoreError::Io(_) | StoreError::Protocol(_))) {
            // The stream may be mid-frame; nothing after this can be trusted.
            inner.stream = None;
        }
        outcome
    }
}

impl RecordStore for RethinkConnection {
    fn get(&self, table: &TableBinding, id: &Value) -> Result<Option<Record>, StoreError> {
        match self.run(term::get(table, id))?.into_iter().next() {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Record::from_value(value)
                .map(Some)
                .map_err(|other| StoreError::Protocol(format!("expected a document, got {other}"))),
        }
    }

    fn all(&self, table: &TableBinding) -> Result<Vec<Record>, StoreError> {
        self.run(term::table(table))?
            .into_iter()
            .map(|value| {
                Record::from_value(value).map_err(|other| {
                    StoreError::Protocol(format!("expected a document, got {other}"))
                })
            })
            .collect()
    }

    fn replace(&self, table: &TableBinding, record: &Record) -> Result<(), StoreError> {
        let summary = match self.run(term::insert_replace(table, record))?.into_iter().next() {
            Some(value) => serde_json::from_value::<WriteSummary>(value)?,
            None => WriteSummary::default(),
        };
        if summary.errors > 0 {
            return Err(StoreError::Write(
                summary
                    .first_error
                    .unwrap_or_else(|| format!("{} errors", summary.errors)),
            ));
        }
        Ok(())
    }

    fn close(&self) -> Result<(), StoreError> {
        if let Some(stream) = self.lock().stream.take() {
            stream.shutdown(Shutdown::Both)?;
            tracing::debug!(address = %self.address, "connection closed");
        }
        Ok(())
    }
}

fn handshake<S: Read + Write>(stream: &mut S, scram: &ScramClient) -> Result<(), StoreError> {
    let mut hello = V1_0.to_le_bytes().to_vec();
    hello.extend(serde_json::to_vec(&json!({
        "protocol_version": 0,
        "authentication_method": "SCRAM-SHA-256",
        "authentication": scram.client_first(),
    }))?);
    hello.push(0);
    stream.write_all(&hello)?;

    read_reply(stream)?;
    let server_first = read_reply(stream)?
        .authentication
        .ok_or_else(|| StoreError::Handshake("server sent no SCRAM challenge".to_string()))?;
    let (client_final, verifier) = scram.client_final(&server_first)?;

    let mut answer = serde_json::to_vec(&json!({ "authentication": client_final }))?;
    answer.push(0);
    stream.write_all(&answer)?;

    let server_final = read_reply(stream)?
        .authentication
        .ok_or_else(|| StoreError::Handshake("server sent no SCRAM signature".to_string()))?;
    verifier.verify(&server_final)?;
    Ok(())
}

/// Read one NUL-terminated handshake message. Servers that refuse the
/// protocol answer with plain text instead of JSON.
fn read_reply<S: Read>(stream: &mut S) -> Result<HandshakeReply, StoreError> {
    let mut bytes = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte)?;
        if byte[0] == 0 {
            break;
        }
        if bytes.len() >= MAX_HANDSHAKE_MESSAGE {
            return Err(StoreError::Protocol("handshake message too long".to_string()));
        }
        bytes.push(byte[0]);
    }
    let text = String::from_utf8_lossy(&bytes);
    let reply: HandshakeReply = serde_json::from_slice(&bytes)
        .map_err(|_| StoreError::Handshake(text.trim().to_string()))?;
    if reply.success {
        Ok(reply)
    } else {
        Err(StoreError::Handshake(
            reply.error.unwrap_or_else(|| text.into_owned()),
        ))
    }
}

/// Send `query` and follow partial sequences until the server is done.
fn drain<S: Read + Write>(stream: &mut S, token: u64, query: &Value) -> Result<Vec<Value>, StoreError> {
    let mut results = Vec::new();
    let mut response = exchange(stream, token, query)?;
    loop {
        match response.kind() {
            ResponseKind::Atom | ResponseKind::Sequence => {
                results.append(&mut response.r);
                return Ok(results);
            }
            ResponseKind::Partial => {
                results.append(&mut response.r);
                response = exchange(stream, token, &term::continue_query())?;
            }
            ResponseKind::Error(kind) => {
                return Err(StoreError::Query {
                    kind,
                    message: response.error_message(),
                });
            }
            ResponseKind::Unexpected(t) => {
                return Err(StoreError::Protocol(format!("unexpected response type {t}")));
            }
        }
    }
}

fn exchange<S: Read + Write>(stream: &mut S, token: u64, query: &Value) -> Result<Response, StoreError> {
    let body = serde_json::to_vec(query)?;
    let len = u32::try_from(body.len())
        .map_err(|_| StoreError::Protocol("query exceeds 4 GiB".to_string()))?;
    let mut frame = Vec::with_capacity(12 + body.len());
    frame.extend_from_slice(&token.to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&body);
    stream.write_all(&frame)?;
    stream.flush()?;

    let mut token_bytes = [0u8; 8];
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut token_bytes)?;
    stream.read_exact(&mut len_bytes)?;
    let reply_token = u64::from_le_bytes(token_bytes);
    if reply_token != token {
        return Err(StoreError::Protocol(format!(
            "response for token {reply_token}, expected {token}"
        )));
    }
    let mut body = vec![0u8; u32::from_le_bytes(len_bytes) as usize];
    stream.read_exact(&mut body)?;
    Ok(serde_json::from_slice(&body)?)
}
