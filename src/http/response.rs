//! Responses sent to rejected clients.

use axum::http::header::{ACCEPT, LOCATION, REFERER, RETRY_AFTER, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use cookie::{Cookie, SameSite};
use serde_json::json;

use crate::ratelimit::Violation;

/// Cookie carrying the flash error message for browser clients.
pub const FLASH_COOKIE: &str = "flash_error";

/// Whether the client asked for a JSON response.
pub fn wants_json(headers: &HeaderMap) -> bool {
    let ajax = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("XMLHttpRequest"));
    let accepts_json = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"));
    ajax || accepts_json
}

/// Build the rejection for a blocked request.
///
/// API and AJAX clients get `429 Too Many Requests` with a JSON body.
/// Browsers are redirected back to the referring page (or `/`) with the
/// message in a flash cookie.
pub fn rejection_response(headers: &HeaderMap, message: &str, violation: &Violation) -> Response {
    if wants_json(headers) {
        let retry_after = violation.triggered_interval.seconds().to_string();
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(RETRY_AFTER, retry_after)],
            Json(json!({ "error": message })),
        )
            .into_response();
    }

    let location = headers
        .get(REFERER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("/")
        .to_string();
    let flash = Cookie::build((FLASH_COOKIE, message.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    (
        StatusCode::FOUND,
        [(LOCATION, location), (SET_COOKIE, flash.encoded().to_string())],
    )
        .into_response()
}
