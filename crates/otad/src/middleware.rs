//! Request middleware for the device surface.
//!
//! TLS is terminated by the reverse proxy in front of the device listener.
//! The proxy reports the client certificate check in `X-SSL-Client-Verify`;
//! anything other than `SUCCESS` is rejected before a handler runs.

use crate::error::ApiError;
use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use ota_common::OtaError;
use tracing::warn;

/// Header set by the proxy after verifying the client certificate
pub const CLIENT_VERIFY_HEADER: &str = "x-ssl-client-verify";

/// Value the proxy uses for a verified certificate
pub const CLIENT_VERIFY_SUCCESS: &str = "SUCCESS";

pub const MTLS_REQUIRED: &str = "mTLS client certificate required";

/// Whether the proxy vouched for the client certificate
pub fn client_verified(headers: &HeaderMap) -> bool {
    headers
        .get(CLIENT_VERIFY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == CLIENT_VERIFY_SUCCESS)
        .unwrap_or(false)
}

/// Reject device requests that did not pass mutual TLS
pub async fn require_mtls(request: Request, next: Next) -> Response {
    if !client_verified(request.headers()) {
        let status = request
            .headers()
            .get(CLIENT_VERIFY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("missing");
        warn!(
            "Rejected {} {}: client verify = {}",
            request.method(),
            request.uri().path(),
            status
        );
        return ApiError::from(OtaError::Forbidden(MTLS_REQUIRED.to_string())).into_response();
    }

    next.run(request).await
}
