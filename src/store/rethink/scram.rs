//! SCRAM-SHA-256 client (RFC 5802 / RFC 7677).

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum ScramError {
    #[error("malformed server message: {0}")]
    Malformed(String),

    #[error("server nonce does not extend the client nonce")]
    NonceMismatch,

    #[error("server rejected credentials: {0}")]
    Server(String),

    #[error("server signature did not verify")]
    ServerSignature,
}

/// One authentication conversation.
#[derive(Debug)]
pub struct ScramClient {
    user: String,
    password: String,
    nonce: String,
}

/// Expected server signature, checked against the server-final message.
#[derive(Debug)]
pub struct ServerVerifier {
    expected: [u8; 32],
}

impl ScramClient {
    pub fn new(user: &str, password: &str) -> Self {
        Self::with_nonce(user, password, &STANDARD.encode(rand::random::<[u8; 18]>()))
    }

    pub fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.to_string(),
            nonce: nonce.to_string(),
        }
    }

    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare())
    }

    fn client_first_bare(&self) -> String {
        let user = self.user.replace('=', "=3D").replace(',', "=2C");
        format!("n={user},r={}", self.nonce)
    }

    /// Answer the server-first message.
    ///
    /// # Errors
    /// Returns an error if the message is malformed, carries a server error,
    /// or its nonce does not extend ours.
    pub fn client_final(&self, server_first: &str) -> Result<(String, ServerVerifier), ScramError> {
        let attributes = parse_attributes(server_first)?;
        let nonce = required(&attributes, "r")?;
        if !nonce.starts_with(&self.nonce) || nonce.len() == self.nonce.len() {
            return Err(ScramError::NonceMismatch);
        }
        let salt = STANDARD
            .decode(required(&attributes, "s")?)
            .map_err(|err| ScramError::Malformed(format!("salt: {err}")))?;
        let iterations: u32 = required(&attributes, "i")?
            .parse()
            .ok()
            .filter(|&i| i > 0)
            .ok_or_else(|| ScramError::Malformed("iteration count".to_string()))?;

        let mut salted = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(self.password.as_bytes(), &salt, iterations, &mut salted);

        let client_key = hmac(&salted, b"Client Key")?;
        let stored_key = Sha256::digest(client_key);
        let without_proof = format!("c=biws,r={nonce}");
        let auth_message = format!(
            "{},{server_first},{without_proof}",
            self.client_first_bare()
        );
        let client_signature = hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature)
            .map(|(key, sig)| key ^ sig)
            .collect();

        let server_key = hmac(&salted, b"Server Key")?;
        let expected = hmac(&server_key, auth_message.as_bytes())?;

        Ok((
            format!("{without_proof},p={}", STANDARD.encode(proof)),
            ServerVerifier { expected },
        ))
    }
}

impl ServerVerifier {
    /// Check the server-final message.
    ///
    /// # Errors
    /// Returns an error if the server reports a failure or its signature differs.
    pub fn verify(&self, server_final: &str) -> Result<(), ScramError> {
        let attributes = parse_attributes(server_final)?;
        let signature = STANDARD
            .decode(required(&attributes, "v")?)
            .map_err(|err| ScramError::Malformed(format!("signature: {err}")))?;
        if signature == self.expected {
            Ok(())
        } else {
            Err(ScramError::ServerSignature)
        }
    }
}

fn parse_attributes(message: &str) -> Result<HashMap<&str, &str>, ScramError> {
    let attributes: HashMap<&str, &str> = message
        .split(',')
        .filter_map(|part| part.split_once('='))
        .collect();
    if let Some(error) = attributes.get("e") {
        return Err(ScramError::Server((*error).to_string()));
    }
    Ok(attributes)
}

fn required<'a>(attributes: &HashMap<&str, &'a str>, key: &str) -> Result<&'a str, ScramError> {
    attributes
        .get(key)
        .copied()
        .ok_or_else(|| ScramError::Malformed(format!("missing '{key}'")))
}

fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32], ScramError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| ScramError::Malformed(format!("hmac key: {err}")))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}
