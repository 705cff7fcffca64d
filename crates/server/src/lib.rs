// tally-server: realtime estimation session backend.
//
// Clients connect over `/ws`, get an opaque connection id, and receive a
// membership snapshot broadcast whenever anyone joins, votes, or leaves.
// An administrative REST surface under `/connection` reads and writes the
// same registry.

pub mod api;
pub mod config;
pub mod cors;
pub mod error;
pub mod fanout;
pub mod registry;
pub mod store;
pub mod ws;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::time::Instant;
use tracing::{error, info};

use crate::fanout::ConnectionHub;
use crate::registry::ConnectionRegistry;

const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

pub fn build_router(registry: ConnectionRegistry, hub: ConnectionHub) -> Router {
    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .merge(ws::router(registry.clone(), hub.clone()))
            .merge(api::router(registry, hub)),
    )
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = error::request_id_from_headers_or_generate(request.headers());

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response =
        error::with_request_id_scope(request_id.clone(), next.run(request)).await;

    error::attach_request_id_header(&mut response, &request_id);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = started_at.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
