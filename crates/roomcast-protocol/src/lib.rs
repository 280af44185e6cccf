//! Wire protocol for Roomcast.
//!
//! This crate defines the "language" that clients and the server speak:
//!
//! - **Types** ([`Envelope`], [`MessageKind`], the id newtypes,
//!   [`CloseCode`]) — what travels on the wire.
//! - **Document** ([`SessionState`], [`SessionClient`]) — the one canonical
//!   typed schema for the synced session document.
//! - **Patch** ([`PatchOp`], [`diff`], [`apply`]) — the structural
//!   diff/patch codec behind `delta-state-update`.
//! - **Codec** ([`Codec`], [`JsonCodec`]) — how messages become bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! The protocol layer knows nothing about connections, rooms, or timers —
//! it only defines shapes and the pure functions over them.

mod codec;
mod error;
mod patch;
mod state;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use patch::{apply, diff, PatchOp};
pub use state::{
    default_display_name, now_unix_millis, validate_display_name,
    DevicePlatform, DeviceType, SessionClient, SessionState,
    DISPLAY_NAME_MAX_CHARS, DISPLAY_NAME_MIN_CHARS, HOST_DISPLAY_NAME,
};
pub use types::{
    AccessCode, ClientId, CloseCode, ConnectionToken, CurrentTimePayload,
    Envelope, MessageKind, PingPayload, SessionId,
};
