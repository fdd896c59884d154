use axum::http::{header, HeaderMap};
use subtle::ConstantTimeEq;

const BEARER_PREFIX: &str = "Bearer ";

/// Why a bearer check rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

impl AuthError {
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingToken => "missing bearer token",
            Self::InvalidToken => "invalid bearer token",
        }
    }
}

/// Checks the `Authorization: Bearer <token>` header against `secret` in constant time.
pub fn authorize(headers: &HeaderMap, secret: &str) -> Result<(), AuthError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)?;

    if token.as_bytes().ct_eq(secret.as_bytes()).into() {
        Ok(())
    } else {
        Err(AuthError::InvalidToken)
    }
}
