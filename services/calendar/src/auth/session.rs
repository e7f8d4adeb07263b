//! Cookie-based session resolution.
//!
//! Two independent cookies carry the signed tokens, one per role. The admin
//! cookie is consulted first so an admin browsing the viewer UI keeps their
//! elevated session. Issuing and clearing share one place so every endpoint
//! sets identical cookie attributes.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::auth::token::{self, Role};
use crate::config::AuthConfig;

pub const VIEWER_COOKIE: &str = "viewer_session";
pub const ADMIN_COOKIE: &str = "admin_session";

/// Resolve the session role from the request cookies, admin first.
pub fn resolve_session(jar: &CookieJar, auth: &AuthConfig) -> Option<Role> {
    if resolve_admin(jar, auth) {
        return Some(Role::Admin);
    }
    let cookie = jar.get(VIEWER_COOKIE)?;
    let verified = token::verify(&auth.session_secret, cookie.value())?;
    (verified.role == Role::Viewer).then_some(Role::Viewer)
}

/// Admin-only variant: accepts nothing but a valid admin cookie.
pub fn resolve_admin(jar: &CookieJar, auth: &AuthConfig) -> bool {
    jar.get(ADMIN_COOKIE)
        .and_then(|cookie| token::verify(&auth.session_secret, cookie.value()))
        .map(|verified| verified.role == Role::Admin)
        .unwrap_or(false)
}

/// Create the session token and matching cookie for a freshly logged-in role.
pub fn issue_cookie(auth: &AuthConfig, role: Role) -> Cookie<'static> {
    let (name, max_age_secs) = match role {
        Role::Viewer => (VIEWER_COOKIE, auth.viewer_session_max_age_secs),
        Role::Admin => (ADMIN_COOKIE, auth.admin_session_max_age_secs),
    };
    let token = token::create(&auth.session_secret, role, max_age_secs);
    Cookie::build((name, token))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(max_age_secs))
        .build()
}

/// Overwrite a session cookie with an immediately expiring empty one.
pub fn expire_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::ZERO)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_auth() -> AuthConfig {
        AuthConfig {
            session_secret: "secret".to_string(),
            viewer_password: "carrots".to_string(),
            admin_pin: "0214".to_string(),
            viewer_session_max_age_secs: 3600,
            admin_session_max_age_secs: 600,
        }
    }

    fn jar_with(cookies: &[(&'static str, String)]) -> CookieJar {
        let mut jar = CookieJar::default();
        for (name, value) in cookies {
            jar = jar.add(Cookie::new(*name, value.clone()));
        }
        jar
    }

    #[test]
    fn test_no_cookies_no_session() {
        assert_eq!(resolve_session(&CookieJar::default(), &test_auth()), None);
    }

    #[test]
    fn test_viewer_cookie_resolves_viewer() {
        let auth = test_auth();
        let token = token::create(&auth.session_secret, Role::Viewer, 3600);
        let jar = jar_with(&[(VIEWER_COOKIE, token)]);
        assert_eq!(resolve_session(&jar, &auth), Some(Role::Viewer));
        assert!(!resolve_admin(&jar, &auth));
    }

    #[test]
    fn test_admin_cookie_wins_over_viewer() {
        let auth = test_auth();
        let viewer = token::create(&auth.session_secret, Role::Viewer, 3600);
        let admin = token::create(&auth.session_secret, Role::Admin, 3600);
        let jar = jar_with(&[(VIEWER_COOKIE, viewer), (ADMIN_COOKIE, admin)]);
        assert_eq!(resolve_session(&jar, &auth), Some(Role::Admin));
    }

    #[test]
    fn test_viewer_token_in_admin_cookie_rejected() {
        let auth = test_auth();
        let viewer = token::create(&auth.session_secret, Role::Viewer, 3600);
        let jar = jar_with(&[(ADMIN_COOKIE, viewer)]);
        assert_eq!(resolve_session(&jar, &auth), None);
    }

    #[test]
    fn test_garbage_cookie_rejected() {
        let auth = test_auth();
        let jar = jar_with(&[(VIEWER_COOKIE, "not|a|token".to_string())]);
        assert_eq!(resolve_session(&jar, &auth), None);
    }

    #[test]
    fn test_issued_cookie_round_trips() {
        let auth = test_auth();
        let cookie = issue_cookie(&auth, Role::Admin);
        assert_eq!(cookie.name(), ADMIN_COOKIE);
        let jar = CookieJar::default().add(cookie);
        assert!(resolve_admin(&jar, &auth));
    }
}
