use axum::http::{HeaderMap, header::COOKIE};
use stationlog_core::UserId;
use tracing::debug;

use crate::registry::SessionRegistry;

use super::error::ApiError;

pub const SESSION_COOKIE: &str = "session";

/// Extracts the `session` cookie value from the request headers.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.trim())
        .filter(|token| !token.is_empty())
}

/// Resolves the caller from the session cookie. Missing or unknown → 401.
pub async fn authenticate<S: SessionRegistry>(
    sessions: &S,
    headers: &HeaderMap,
) -> Result<UserId, ApiError> {
    let Some(token) = session_token(headers) else {
        debug!("request without session cookie");
        return Err(ApiError::Unauthorized);
    };

    sessions
        .resolve(token)
        .await
        .map_err(ApiError::storage)?
        .ok_or(ApiError::Unauthorized)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn finds_session_among_other_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; session=abc123; lang=en"));

        assert_eq!(session_token(&headers), Some("abc123"));
    }

    #[test]
    fn missing_or_empty_session() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);

        headers.insert(COOKIE, HeaderValue::from_static("sessionid=x; session="));
        assert_eq!(session_token(&headers), None);
    }
}
