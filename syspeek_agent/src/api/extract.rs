//! Access extractors. A handler that takes [`Viewer`] or [`Operator`] only runs
//! once the access decision for that tier has passed.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, HeaderMap};
use std::convert::Infallible;

use crate::auth::{Access, Grant, SESSION_TTL};
use crate::error::ApiError;
use crate::state::AppState;

pub const SESSION_COOKIE: &str = "session";

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim_start();
    let token = match raw.strip_prefix("Bearer") {
        Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest,
        _ => raw,
    }
    .trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Session token from the `session` cookie, else the Authorization header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    cookie_token(headers).or_else(|| header_token(headers))
}

pub fn session_cookie(token: &str) -> String {
    format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; Max-Age={}; SameSite=Strict",
        SESSION_TTL.as_secs()
    )
}

pub fn cleared_cookie() -> String {
    format!("{SESSION_COOKIE}=; Path=/; HttpOnly; Max-Age=0; SameSite=Strict")
}

/// Whatever token the request carried, valid or not.
pub struct SessionToken(pub Option<String>);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for SessionToken {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(SessionToken(session_token(&parts.headers)))
    }
}

/// Read access: admin, public, or any valid session.
pub struct Viewer(pub Grant);

/// Read-write access: admin, or a read-write session.
pub struct Operator(pub Grant);

fn authorize(parts: &Parts, state: &AppState, access: Access) -> Result<Grant, ApiError> {
    let token = session_token(&parts.headers);
    Ok(state.auth.authorize(token.as_deref(), access)?)
}

#[async_trait]
impl FromRequestParts<AppState> for Viewer {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        authorize(parts, state, Access::View).map(Viewer)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Operator {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        authorize(parts, state, Access::Mutate).map(Operator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn cookie_wins_over_header() {
        let mut h = HeaderMap::new();
        h.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=abc123"));
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer zzz"));
        assert_eq!(session_token(&h).as_deref(), Some("abc123"));
    }

    #[test]
    fn bearer_and_raw_header() {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(session_token(&h).as_deref(), Some("tok"));
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("rawtok"));
        assert_eq!(session_token(&h).as_deref(), Some("rawtok"));
    }

    #[test]
    fn empty_values_are_no_token() {
        let mut h = HeaderMap::new();
        h.insert(header::COOKIE, HeaderValue::from_static("session="));
        assert_eq!(session_token(&h), None);
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(session_token(&h), None);
    }

    #[test]
    fn cookie_attributes() {
        let c = session_cookie("t0k");
        assert!(c.starts_with("session=t0k;"));
        assert!(c.contains("HttpOnly"));
        assert!(c.contains("Max-Age=86400"));
        assert!(c.contains("SameSite=Strict"));
        assert!(cleared_cookie().contains("Max-Age=0"));
    }
}
