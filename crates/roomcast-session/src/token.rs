//! The token authority: issues, updates, redeems, and expires the
//! short-lived tokens that authenticate persistent connections.
//!
//! The flow: the HTTP layer issues a token (optionally stashing join data
//! like a display name on it), the client presents the token when opening
//! its socket, and the socket glue redeems it — exactly once. Anything not
//! redeemed within the TTL is reclaimed by the periodic sweep.
//!
//! # Concurrency
//!
//! All state lives behind one mutex, so `redeem` is atomic: of two
//! concurrent redeems for the same token, exactly one gets the payload and
//! the other gets [`TokenError::NotIssued`]. The sweep takes the same
//! mutex, so a redeem that wins the lock always beats the sweep to a
//! not-yet-expired token.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use roomcast_protocol::ConnectionToken;

use crate::{TokenConfig, TokenError};

/// Arbitrary key/value join data attached to a token at issue/update time
/// and consumed on redemption (e.g. `{"displayName": "Ann"}`).
pub type TokenPayload = serde_json::Map<String, serde_json::Value>;

/// How many times token generation retries before reporting a collision.
const MAX_GENERATE_ATTEMPTS: usize = 16;

/// One outstanding token.
#[derive(Debug)]
struct IssuedToken {
    issued_at: Instant,
    payload: Option<TokenPayload>,
}

/// Issues and redeems connection tokens.
pub struct TokenAuthority {
    config: TokenConfig,
    tokens: Mutex<HashMap<ConnectionToken, IssuedToken>>,
}

impl TokenAuthority {
    /// Creates an authority with no outstanding tokens.
    pub fn new(config: TokenConfig) -> Self {
        Self {
            config,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    fn locked(
        &self,
    ) -> MutexGuard<'_, HashMap<ConnectionToken, IssuedToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issues a fresh token carrying the given join payload.
    ///
    /// Generation is collision-checked against outstanding tokens and
    /// retried internally.
    ///
    /// # Errors
    /// [`TokenError::Collision`] if no unused token could be generated
    /// within the retry bound.
    pub fn issue(
        &self,
        payload: Option<TokenPayload>,
    ) -> Result<ConnectionToken, TokenError> {
        let mut tokens = self.locked();

        for _ in 0..MAX_GENERATE_ATTEMPTS {
            let token = ConnectionToken::random();
            if tokens.contains_key(&token) {
                continue;
            }

            tokens.insert(
                token.clone(),
                IssuedToken {
                    issued_at: Instant::now(),
                    payload,
                },
            );
            tracing::debug!(%token, "session token issued");
            return Ok(token);
        }

        tracing::error!(
            attempts = MAX_GENERATE_ATTEMPTS,
            "token generation kept colliding"
        );
        Err(TokenError::Collision)
    }

    /// Replaces an outstanding token's payload and re-stamps its issue
    /// time (sliding TTL).
    ///
    /// # Errors
    /// [`TokenError::NotIssued`] if the token is not outstanding.
    pub fn update(
        &self,
        token: &ConnectionToken,
        payload: Option<TokenPayload>,
    ) -> Result<(), TokenError> {
        let mut tokens = self.locked();
        let entry =
            tokens.get_mut(token).ok_or(TokenError::NotIssued)?;

        entry.issued_at = Instant::now();
        entry.payload = payload;

        tracing::debug!(%token, "session token updated");
        Ok(())
    }

    /// Redeems a token: removes it and returns its payload.
    ///
    /// Exactly-once: a token redeemed twice yields `Ok` for exactly one
    /// caller.
    ///
    /// # Errors
    /// [`TokenError::NotIssued`] if the token is not outstanding.
    pub fn redeem(
        &self,
        token: &ConnectionToken,
    ) -> Result<Option<TokenPayload>, TokenError> {
        let mut tokens = self.locked();
        let entry = tokens.remove(token).ok_or(TokenError::NotIssued)?;

        tracing::debug!(%token, "session token redeemed");
        Ok(entry.payload)
    }

    /// Whether the token is currently outstanding.
    pub fn is_outstanding(&self, token: &ConnectionToken) -> bool {
        self.locked().contains_key(token)
    }

    /// Removes every token older than the TTL.
    ///
    /// Returns the removed tokens. Driven on
    /// [`TokenConfig::sweep_interval`] by the server's GC task.
    pub fn sweep_expired(&self) -> Vec<ConnectionToken> {
        let ttl = self.config.ttl;
        let mut expired = Vec::new();

        self.locked().retain(|token, entry| {
            if entry.issued_at.elapsed() > ttl {
                tracing::debug!(%token, "session token expired");
                expired.push(token.clone());
                false
            } else {
                true
            }
        });

        expired
    }

    /// Number of outstanding tokens.
    pub fn outstanding(&self) -> usize {
        self.locked().len()
    }

    /// How often the expiry sweep should run.
    pub fn sweep_interval(&self) -> std::time::Duration {
        self.config.sweep_interval
    }
}

// =========================================================================
// Tests
// =========================================================================
