//! Public-key identity resolution.
//!
//! The handshake hands every offered key to a [`PublicKeyVerifier`]. A
//! successful lookup yields the [`Identity`] that every later authorization
//! check on the connection uses.

use std::fmt;
use std::net::SocketAddr;

use russh::keys::{HashAlg, PublicKey};

use crate::error::UnknownKey;

/// The principal a connection acts as.
///
/// Created once at handshake and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Identities are usually full key texts; the tail is enough for logs.
        let tail = self.0.len().saturating_sub(16);
        match self.0.get(tail..) {
            Some(suffix) if tail > 0 => write!(f, "…{suffix}"),
            _ => f.write_str(&self.0),
        }
    }
}

/// What the verifier gets to see about the connecting client.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionMeta<'a> {
    pub peer_addr: Option<SocketAddr>,
    pub user: &'a str,
}

/// Maps a presented public key to an identity.
///
/// Called once per offered key during the handshake, before any channel
/// exists. Returning [`UnknownKey`] rejects the key.
pub trait PublicKeyVerifier: Send + Sync {
    fn verify(&self, meta: ConnectionMeta<'_>, key: &PublicKey) -> Result<Identity, UnknownKey>;
}

/// Render a key the way it appears in an `authorized_keys` line, without the
/// comment: `<algorithm> <base64>`.
pub fn authorized_key_text(key: &PublicKey) -> Option<String> {
    let openssh = key.to_openssh().ok()?;
    let mut fields = openssh.split_whitespace();
    let algorithm = fields.next()?;
    let blob = fields.next()?;
    Some(format!("{algorithm} {blob}"))
}

/// SHA-256 fingerprint in `ssh-keygen -l` format.
pub fn fingerprint(key: &PublicKey) -> String {
    key.fingerprint(HashAlg::Sha256).to_string()
}
