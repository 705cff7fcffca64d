// CORS middleware configuration for the administrative API.
//
// Reads allowed origins from the `TALLY_SERVER_CORS_ORIGINS` environment
// variable (comma-separated). The default is a wildcard: the session
// endpoints are meant to be reachable from any board frontend unless an
// operator pins the origin list.

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

/// Environment variable that overrides the allowed origin list.
const CORS_ORIGINS_ENV: &str = "TALLY_SERVER_CORS_ORIGINS";

/// Build a [`CorsLayer`] from the environment.
///
/// - If `TALLY_SERVER_CORS_ORIGINS` is unset or `"*"`, allows any origin.
/// - If set to a comma-separated list, allows exactly those origins (and
///   credentials, which a wildcard cannot carry).
pub fn cors_layer() -> CorsLayer {
    cors_layer_from_env(std::env::var(CORS_ORIGINS_ENV).ok())
}

fn cors_layer_from_env(env_value: Option<String>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::PUT, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([HeaderName::from_static("x-request-id")])
        .max_age(std::time::Duration::from_secs(3600));

    match env_value.as_deref() {
        None | Some("*") => base.allow_origin(AllowOrigin::any()),
        Some(origins) => base.allow_origin(parse_origins(origins)).allow_credentials(true),
    }
}

fn parse_origins(comma_separated: &str) -> Vec<HeaderValue> {
    comma_separated
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| HeaderValue::from_str(s).ok())
        .collect()
}
