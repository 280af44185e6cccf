//! `RoomcastServer` builder and serve loop.
//!
//! This ties the layers together: the token authority, the connection
//! registry, and the session directory are constructed here — explicit
//! instances, passed down, never module-level globals — and the axum
//! router serves REST and WebSocket traffic on one port.

use std::sync::Arc;

use roomcast_room::SessionDirectory;
use roomcast_session::{ConnectionRegistry, TokenAuthority};
use tokio::net::TcpListener;

use crate::routes;
use crate::state::AppState;
use crate::{RoomcastError, ServerConfig};

/// Builder for configuring and starting a Roomcast server.
///
/// # Example
///
/// ```rust,no_run
/// use roomcast::RoomcastServer;
///
/// # async fn run() -> Result<(), roomcast::RoomcastError> {
/// let server = RoomcastServer::builder()
///     .bind("0.0.0.0:3000")
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct RoomcastServerBuilder {
    config: ServerConfig,
}

impl RoomcastServerBuilder {
    /// A builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Sets the address the combined HTTP/WS entry point listens on.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Replaces the entire configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the listener, wires the components together, and starts the
    /// background tasks (directory event pump, GC sweeps).
    pub async fn build(self) -> Result<RoomcastServer, RoomcastError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;

        let registry = Arc::new(ConnectionRegistry::new(
            self.config.registry.clone(),
        ));
        let (directory, events) = SessionDirectory::new(
            self.config.room.clone(),
            Arc::clone(&registry),
        );
        let directory = Arc::new(directory);

        tokio::spawn(Arc::clone(&directory).drive_events(events));

        let state = Arc::new(AppState {
            tokens: TokenAuthority::new(self.config.tokens.clone()),
            registry,
            directory,
        });

        crate::gc::spawn(&state);

        Ok(RoomcastServer { listener, state })
    }
}

impl Default for RoomcastServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound, ready-to-run Roomcast server.
pub struct RoomcastServer {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl RoomcastServer {
    /// Creates a new builder.
    pub fn builder() -> RoomcastServerBuilder {
        RoomcastServerBuilder::new()
    }

    /// The local address the listener is bound to. Useful with port 0.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests until the process is terminated.
    pub async fn run(self) -> Result<(), RoomcastError> {
        tracing::info!("roomcast server running");
        let app = routes::router(self.state);
        axum::serve(self.listener, app).await?;
        Ok(())
    }
}
