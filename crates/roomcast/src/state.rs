//! Shared server state handed to every request handler.

use std::sync::Arc;

use roomcast_room::SessionDirectory;
use roomcast_session::{ConnectionRegistry, TokenAuthority};

/// The explicitly-constructed component instances. One of these exists
/// per server; handlers receive it through axum's `State` extractor.
pub(crate) struct AppState {
    pub(crate) tokens: TokenAuthority,
    pub(crate) registry: Arc<ConnectionRegistry>,
    pub(crate) directory: Arc<SessionDirectory>,
}
