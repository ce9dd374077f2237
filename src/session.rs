//! Session token service.
//!
//! Mints and resolves the opaque bearer tokens that move a member from the
//! lobby to an external game. Tokens are 32 random bytes rendered as
//! URL-safe base64 (43 characters, 256 bits of entropy). The store keeps
//! only the SHA-256 digest of each token: resolution hashes the presented
//! token and looks the digest up, so no plaintext credential exists at rest
//! and the lookup cost does not depend on stored values.

use std::sync::Arc;

use anyhow::Result;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::metrics::ServerMetrics;
use crate::protocol::{PremiumTier, UserId};
use crate::store::LobbyStore;

/// Size of the random token material in bytes.
const TOKEN_BYTES: usize = 32;

/// Snapshot of member context at mint time. Hints for the game side, not
/// authority: the token row itself is the authority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub display_name: String,
    pub is_host: bool,
    pub player_count: usize,
    pub premium_tier: PremiumTier,
}

/// Session row as persisted. `token_hash` is the SHA-256 hex digest of the
/// issued token string; the plaintext is returned to the caller once and
/// never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub token_hash: String,
    pub room_code: String,
    pub user_id: UserId,
    pub game_type: String,
    pub streamer_mode: bool,
    pub metadata: SessionMetadata,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

/// Generate a fresh URL-safe token string.
pub fn generate_token() -> Result<String> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut bytes)
        .map_err(|err| anyhow::anyhow!("failed to obtain secure random bytes: {err}"))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// SHA-256 hex digest of a token string.
pub fn token_digest(token: &str) -> String {
    use std::fmt::Write;

    let digest = Sha256::digest(token.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Service facade over the session-token table.
pub struct SessionService {
    store: Arc<dyn LobbyStore>,
    ttl: Duration,
    metrics: Arc<ServerMetrics>,
}

impl SessionService {
    pub fn new(store: Arc<dyn LobbyStore>, ttl_secs: u64, metrics: Arc<ServerMetrics>) -> Self {
        Self {
            store,
            ttl: Duration::seconds(ttl_secs as i64),
            metrics,
        }
    }

    /// Mint a token bound to `(room_code, user_id, game_type)`. Returns the
    /// plaintext token; the caller places it in the recipient-specific game
    /// URL (`?session=...`).
    pub async fn mint(
        &self,
        room_code: &str,
        user_id: UserId,
        game_type: &str,
        streamer_mode: bool,
        metadata: SessionMetadata,
    ) -> Result<String> {
        let token = generate_token()?;
        let now = Utc::now();
        let record = SessionRecord {
            token_hash: token_digest(&token),
            room_code: room_code.to_string(),
            user_id,
            game_type: game_type.to_string(),
            streamer_mode,
            metadata,
            created_at: now,
            expires_at: now + self.ttl,
            last_accessed: now,
        };
        self.store.insert_session(record).await?;
        self.metrics.increment_sessions_minted();
        Ok(token)
    }

    /// Resolve a presented token. `None` means unknown or expired; a hit
    /// updates `last_accessed`.
    pub async fn resolve(&self, token: &str) -> Result<Option<SessionRecord>> {
        let record = self
            .store
            .resolve_session(&token_digest(token), Utc::now())
            .await?;
        if record.is_some() {
            self.metrics.increment_sessions_resolved();
        }
        Ok(record)
    }

    /// Delete expired rows; returns the number removed.
    pub async fn purge(&self) -> Result<u64> {
        let purged = self.store.purge_expired_sessions(Utc::now()).await?;
        if purged > 0 {
            self.metrics.add_sessions_purged(purged);
        }
        Ok(purged)
    }
}
