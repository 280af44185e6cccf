//! Connection/token lifecycle for Roomcast.
//!
//! Two pieces, both shared across every session:
//!
//! 1. **TokenAuthority** — short-lived join tokens, issued over HTTP and
//!    redeemed exactly once when the persistent connection opens.
//! 2. **ConnectionRegistry** — the single owner of live transport handles,
//!    keyed by redeemed token, with last-activity tracking and a stale
//!    sweep.
//!
//! # How it fits in the stack
//!
//! ```text
//! Room layer (above)      ← resolves handles by token for each send
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Transport layer (below) ← provides ConnectionHandle
//! ```
//!
//! Both components guard their map with one mutex and are never held
//! across an await; the GC sweeps run on the server's schedule, decoupled
//! from any room's lifecycle.

mod config;
mod error;
mod registry;
mod token;

pub use config::{RegistryConfig, TokenConfig};
pub use error::TokenError;
pub use registry::ConnectionRegistry;
pub use token::{TokenAuthority, TokenPayload};
