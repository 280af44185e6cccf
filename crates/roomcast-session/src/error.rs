//! Error types for the session layer.

/// Errors that can occur while managing join tokens.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// The token is not currently outstanding — it was never issued,
    /// already redeemed, or expired and swept.
    #[error("Session token not issued")]
    NotIssued,

    /// Token generation kept colliding with outstanding tokens.
    ///
    /// With 128-bit tokens this indicates a broken RNG rather than bad
    /// luck; it is surfaced instead of looping forever.
    #[error("could not generate an unused session token")]
    Collision,
}
