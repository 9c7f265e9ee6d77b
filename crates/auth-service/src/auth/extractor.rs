//! Bearer credential extraction.
//!
//! Precedence: `Authorization: Bearer <token>`, then the `token` query
//! parameter, then `X-API-Key` (standalone mode only). Empty values count as
//! absent.

use axum::extract::Query;
use axum::http::{HeaderMap, Uri};
use common::secret::SecretString;
use serde::Deserialize;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Where a credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    AuthorizationHeader,
    QueryParameter,
    ApiKeyHeader,
}

impl TokenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenSource::AuthorizationHeader => "authorization_header",
            TokenSource::QueryParameter => "query_parameter",
            TokenSource::ApiKeyHeader => "api_key_header",
        }
    }
}

#[derive(Debug)]
pub struct ExtractedToken {
    pub token: SecretString,
    pub source: TokenSource,
}

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Pull a bearer credential out of request parts.
pub fn extract_token(
    headers: &HeaderMap,
    uri: &Uri,
    standalone_mode: bool,
) -> Option<ExtractedToken> {
    if let Some(token) = bearer_from_headers(headers) {
        return Some(ExtractedToken {
            token: SecretString::from(token),
            source: TokenSource::AuthorizationHeader,
        });
    }

    if let Some(token) = token_from_query(uri) {
        return Some(ExtractedToken {
            token: SecretString::from(token),
            source: TokenSource::QueryParameter,
        });
    }

    if standalone_mode {
        if let Some(key) = headers
            .get(API_KEY_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|k| !k.is_empty())
        {
            return Some(ExtractedToken {
                token: SecretString::from(key.to_string()),
                source: TokenSource::ApiKeyHeader,
            });
        }
    }

    None
}

fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?
        .trim();

    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        tracing::debug!(target: "auth.extractor", "Unsupported Authorization scheme");
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn token_from_query(uri: &Uri) -> Option<String> {
    let Query(query) = Query::<TokenQuery>::try_from_uri(uri).ok()?;
    query.token.filter(|t| !t.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use secrecy::ExposeSecret;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_bearer_header() {
        let extracted = extract_token(
            &headers(&[("authorization", "Bearer abc.def")]),
            &uri("/api"),
            false,
        )
        .unwrap();
        assert_eq!(extracted.token.expose_secret(), "abc.def");
        assert_eq!(extracted.source, TokenSource::AuthorizationHeader);
    }

    #[test]
    fn test_bearer_scheme_case_insensitive() {
        for scheme in ["bearer", "BEARER", "BeArEr"] {
            let value = format!("{scheme} tok");
            let extracted =
                extract_token(&headers(&[("authorization", &value)]), &uri("/"), false).unwrap();
            assert_eq!(extracted.token.expose_secret(), "tok");
        }
    }

    #[test]
    fn test_non_bearer_scheme_ignored() {
        let result = extract_token(
            &headers(&[("authorization", "Basic dXNlcjpwYXNz")]),
            &uri("/"),
            false,
        );
        assert!(result.is_none());
    }

    #[test]
    fn test_empty_bearer_is_absent() {
        assert!(extract_token(&headers(&[("authorization", "Bearer ")]), &uri("/"), false).is_none());
        assert!(extract_token(&headers(&[("authorization", "Bearer")]), &uri("/"), false).is_none());
    }

    #[test]
    fn test_query_parameter_fallback() {
        let extracted =
            extract_token(&HeaderMap::new(), &uri("/ws?room=1&token=q%2Btok"), false).unwrap();
        assert_eq!(extracted.token.expose_secret(), "q+tok");
        assert_eq!(extracted.source, TokenSource::QueryParameter);
    }

    #[test]
    fn test_header_takes_precedence_over_query() {
        let extracted = extract_token(
            &headers(&[("authorization", "Bearer from-header")]),
            &uri("/?token=from-query"),
            false,
        )
        .unwrap();
        assert_eq!(extracted.token.expose_secret(), "from-header");
    }

    #[test]
    fn test_empty_query_parameter_is_absent() {
        assert!(extract_token(&HeaderMap::new(), &uri("/?token="), false).is_none());
    }

    #[test]
    fn test_api_key_only_in_standalone_mode() {
        let h = headers(&[("x-api-key", "svc-key")]);
        assert!(extract_token(&h, &uri("/"), false).is_none());

        let extracted = extract_token(&h, &uri("/"), true).unwrap();
        assert_eq!(extracted.token.expose_secret(), "svc-key");
        assert_eq!(extracted.source, TokenSource::ApiKeyHeader);
    }

    #[test]
    fn test_bearer_precedes_api_key() {
        let h = headers(&[("authorization", "Bearer tok"), ("x-api-key", "svc-key")]);
        let extracted = extract_token(&h, &uri("/"), true).unwrap();
        assert_eq!(extracted.source, TokenSource::AuthorizationHeader);
    }

    #[test]
    fn test_nothing_presented() {
        assert!(extract_token(&HeaderMap::new(), &uri("/"), true).is_none());
    }
}
