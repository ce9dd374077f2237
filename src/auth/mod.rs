//! Game-service API key validation.
//!
//! Keys are issued as `gb_<service>_<64 hex>` and configured hashed: the
//! configuration stores the SHA-256 hex digest of the full key string, never
//! the plaintext. Validation hashes the presented key and compares digests
//! in constant time against every configured entry, so neither the match
//! position nor the digest contents leak through timing.

mod error;

pub use error::AuthError;

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::ApiKeyEntry;

/// Header carrying the game-service credential.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Identity established by a validated API key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    /// Service identifier embedded in the key, e.g. `ddf`.
    pub service: String,
    /// Whether the key may act on rooms regardless of their current game.
    pub all_rooms: bool,
}

/// Validator over the configured key entries.
pub struct ApiKeyValidator {
    entries: Vec<ApiKeyEntry>,
}

fn sha256_hex(input: &str) -> String {
    use std::fmt::Write;

    let digest = Sha256::digest(input.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Constant-time equality over two digest strings.
fn digests_match(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Quick shape check before hashing: `gb_<service>_<64 hex>`.
fn key_shape_ok(key: &str) -> bool {
    let Some(rest) = key.strip_prefix("gb_") else {
        return false;
    };
    let Some((service, secret)) = rest.rsplit_once('_') else {
        return false;
    };
    !service.is_empty() && secret.len() == 64 && secret.bytes().all(|b| b.is_ascii_hexdigit())
}

impl ApiKeyValidator {
    pub fn new(entries: Vec<ApiKeyEntry>) -> Self {
        Self { entries }
    }

    /// Validate a presented key. Every configured entry is compared even
    /// after a match is found, so the comparison count does not depend on
    /// the key.
    pub fn validate(&self, presented: &str) -> Result<ServiceIdentity, AuthError> {
        if !key_shape_ok(presented) {
            return Err(AuthError::InvalidApiKey);
        }

        let presented_digest = sha256_hex(presented);
        let mut matched: Option<&ApiKeyEntry> = None;
        for entry in &self.entries {
            if digests_match(&presented_digest, &entry.key_hash) && matched.is_none() {
                matched = Some(entry);
            }
        }

        matched
            .map(|entry| ServiceIdentity {
                service: entry.service.clone(),
                all_rooms: entry.all_rooms,
            })
            .ok_or(AuthError::InvalidApiKey)
    }

    /// Check that a validated identity may act on a room. Scope is the
    /// service identifier matched against the room's current game; all-rooms
    /// keys bypass the check.
    pub fn authorize_room(
        &self,
        identity: &ServiceIdentity,
        room_current_game: Option<&str>,
    ) -> Result<(), AuthError> {
        if identity.all_rooms || room_current_game == Some(identity.service.as_str()) {
            Ok(())
        } else {
            Err(AuthError::RoomOutOfScope {
                service: identity.service.clone(),
            })
        }
    }
}
