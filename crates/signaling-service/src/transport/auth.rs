//! Connection authentication.
//!
//! Identity is established by an external collaborator before the socket
//! reaches this service: a trusted proxy injects the authenticated user id
//! as the `x-authenticated-user` header. For local development without the
//! proxy, a `?user=` query parameter is accepted as a fallback. The engine
//! itself never validates credentials; a connection without an identity is
//! rejected before the WebSocket upgrade.

use axum::http::HeaderMap;
use std::collections::HashMap;

/// Header injected by the authenticating proxy.
pub const USER_HEADER: &str = "x-authenticated-user";

/// Query parameter fallback for local development.
pub const USER_QUERY_PARAM: &str = "user";

/// Extract the authenticated user id for an upgrade request.
///
/// The header wins over the query parameter; blank values count as absent.
#[must_use]
pub fn authenticated_user(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
    let from_header = headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok());

    from_header
        .or_else(|| query.get(USER_QUERY_PARAM).map(String::as_str))
        .map(str::trim)
        .filter(|user| !user.is_empty())
        .map(str::to_string)
}
