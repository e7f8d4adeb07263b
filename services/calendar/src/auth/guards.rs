//! Request guards for the two access levels.
//!
//! `RequireViewer` admits any authenticated session (viewer or admin);
//! `RequireAdmin` admits only an admin session, or a request carrying the
//! correct admin PIN header as a fallback channel for scripted curation.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;

use crate::api::AppState;
use crate::auth::session;
use crate::auth::token::{constant_time_eq, Role};
use crate::error::ApiError;

/// Header checked by [`RequireAdmin`] when no admin cookie is present.
pub const ADMIN_PIN_HEADER: &str = "x-admin-pin";

/// Extractor admitting viewer-or-admin sessions. Carries the resolved role.
#[derive(Debug, Clone, Copy)]
pub struct RequireViewer(pub Role);

/// Extractor admitting admin sessions or a valid PIN header.
#[derive(Debug, Clone, Copy)]
pub struct RequireAdmin;

#[async_trait]
impl FromRequestParts<AppState> for RequireViewer {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        match session::resolve_session(&jar, &state.config.auth) {
            Some(role) => Ok(RequireViewer(role)),
            None => Err(ApiError::Unauthorized),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = &state.config.auth;

        let jar = CookieJar::from_headers(&parts.headers);
        if session::resolve_admin(&jar, auth) {
            return Ok(RequireAdmin);
        }

        if let Some(pin) = parts.headers.get(ADMIN_PIN_HEADER) {
            if constant_time_eq(pin.as_bytes(), auth.admin_pin.as_bytes()) {
                return Ok(RequireAdmin);
            }
        }

        Err(ApiError::Unauthorized)
    }
}
