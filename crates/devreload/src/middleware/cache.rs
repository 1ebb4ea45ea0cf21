//! Cache-control middleware.
//!
//! Marks application responses as non-cacheable so a reloaded page always
//! re-fetches its assets.

use axum::http::HeaderValue;
use axum::http::header::CACHE_CONTROL;
use tower::Layer;
use tower_http::set_header::{SetResponseHeader, SetResponseHeaderLayer};

/// Cache-Control header value.
const NO_CACHE: &str = "no-cache";

/// Create layer that overrides Cache-Control with `no-cache`.
pub(crate) fn no_cache_layer() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(CACHE_CONTROL, HeaderValue::from_static(NO_CACHE))
}

/// Wrap `service` with [`no_cache_layer`].
pub(crate) fn no_cache<S>(service: S) -> SetResponseHeader<S, HeaderValue> {
    no_cache_layer().layer(service)
}
