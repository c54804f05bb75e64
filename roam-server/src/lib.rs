//! HTTP surface over the routing engine.
//!
//! A thin mapping layer: each handler parses query parameters (strict about
//! format, permissive about absent optionals), calls one engine or store
//! function, and serialises a fixed JSON shape. Responses are gzip-encoded
//! by the compression layer. The shared state is assembled before the
//! listener binds and is never mutated afterwards; per-request failures
//! answer with an error status and never crash the process.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use log::info;
use thiserror::Error;
use tower_http::compression::CompressionLayer;

use roam_routing::{AddressStore, RoutingEngine};

mod handlers;

/// Immutable state shared by every request handler.
pub struct ServerContext {
    pub engine: RoutingEngine,
    pub addresses: Option<AddressStore>,
}

impl ServerContext {
    /// Bundle the engine with an optional address store.
    #[must_use]
    pub fn new(engine: RoutingEngine, addresses: Option<AddressStore>) -> Self {
        Self { engine, addresses }
    }
}

/// Errors while running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or serving the listener failed.
    #[error("HTTP server failed on {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Assemble the router over a shared context.
#[must_use]
pub fn build_router(context: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/shortest_path", get(handlers::shortest_path))
        .route("/api/v1/complete_job_route", get(handlers::complete_job_route))
        .route("/api/v1/closest_address", get(handlers::closest_address))
        .route("/api/v1/bbox", get(handlers::bbox))
        .route("/api/v1/numAddresses", get(handlers::num_addresses))
        .route("/api/v1/addressSample", get(handlers::address_sample))
        .route(
            "/api/v1/uniformRandomAddressInAnnulus",
            get(handlers::uniform_random_address_in_annulus),
        )
        .layer(CompressionLayer::new())
        .with_state(context)
}

/// Serve until the process is terminated.
///
/// # Errors
///
/// [`ServerError::Io`] when the listener cannot bind or serving fails.
pub async fn run(addr: SocketAddr, context: Arc<ServerContext>) -> Result<(), ServerError> {
    let router = build_router(context);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Io { addr, source })?;
    info!("HTTP server listening on {addr}");
    axum::serve(listener, router)
        .await
        .map_err(|source| ServerError::Io { addr, source })
}
