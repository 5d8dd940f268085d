use std::{future::Future, net::SocketAddr};

use axum::{response::IntoResponse, routing::get, Extension, Router};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    api, config::Config, error::Error, fanout::FanoutHandle, session::SessionHandle,
    storage::Workspace, toolchain::Toolchain,
};

/// The default port to run the server on.
pub const DEFAULT_PORT: u16 = 3123;

async fn run(
    config: Config,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    config.validate()?;

    let fanout = FanoutHandle::new();
    let session = SessionHandle::new(&config, fanout.clone());

    let app = Router::new()
        .nest("/api", api::routes())
        .route("/config", get(show_config))
        .route("/version", get(show_version))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Any web UI may talk to the bridge
                .layer(CorsLayer::permissive())
                // Each websocket needs to be able to reach the session and the fanout
                .layer(Extension(session.clone()))
                .layer(Extension(fanout))
                .layer(Extension(Toolchain::new(config.toolchain.clone())))
                .layer(Extension(Workspace::new(config.workspace.clone())))
                .layer(Extension(config)),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::Server(format!("Could not bind {addr}: {e}")))?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        port_reply
            .send(addr.port())
            .expect("The receiver of which port was allocated should not be dropped");
    }

    info!("listening on {}", addr);

    let served = server.with_graceful_shutdown(shutdown).await;

    info!("Server stopped, closing the session");
    session.shutdown().await;

    served.map_err(|e| Error::Server(e.to_string()))
}

/// Start the server on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
///
/// Runs until the task is dropped.
pub async fn run_any_port(config: Config, allocated_port: oneshot::Sender<u16>) -> Result<(), Error> {
    run(config, None, Some(allocated_port), std::future::pending()).await
}

/// Start the server on the given port.
///
/// When `shutdown` resolves the server stops accepting connections,
/// and any open session is closed before this returns.
pub async fn run_on_port(
    config: Config,
    port: u16,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    run(config, Some(port), None, shutdown).await
}

async fn show_config(Extension(config): Extension<Config>) -> impl IntoResponse {
    match config.serialize_pretty() {
        Ok(pretty) => pretty,
        Err(e) => e.to_string(),
    }
}

async fn show_version() -> impl IntoResponse {
    format!("Serial Bridge v{}\n", env!("CARGO_PKG_VERSION"))
}
