//! The `roomcast` server binary.

use clap::Parser;
use roomcast::{RoomcastError, RoomcastServer};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "roomcast",
    about = "Real-time multiplayer session backend"
)]
struct Args {
    /// Port for the combined HTTP/WebSocket entry point.
    #[arg(long, env = "ROOMCAST_PORT", default_value_t = 3000)]
    port: u16,

    /// Interface to bind.
    #[arg(long, env = "ROOMCAST_BIND", default_value = "0.0.0.0")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<(), RoomcastError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let server = RoomcastServer::builder()
        .bind(&format!("{}:{}", args.bind, args.port))
        .build()
        .await?;

    tracing::info!(addr = %server.local_addr()?, "listening");
    server.run().await
}
