//! Extract the site a request is for (X-Site-ID header, else the Host header).

use crate::tenant::resolve_request_key;
use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{header::HOST, request::Parts},
};

/// Header naming the site explicitly. Default: `X-Site-ID`.
pub const SITE_ID_HEADER: &str = "X-Site-ID";

/// Explicit site id and host name as sent by the client.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SiteKey {
    pub explicit: Option<String>,
    pub host: Option<String>,
}

impl SiteKey {
    /// Tenant key: header, then `SITEKIT_SITE`, then host, then `SERVER_NAME`.
    pub fn key(&self) -> String {
        resolve_request_key(self.explicit.as_deref(), self.host.as_deref())
    }
}

/// Host header without its port.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

fn header_text(parts: &Parts, name: impl axum::http::header::AsHeaderName) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for SiteKey
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(SiteKey {
            explicit: header_text(parts, SITE_ID_HEADER),
            host: header_text(parts, HOST).map(|h| strip_port(&h).to_ascii_lowercase()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> SiteKey {
        let (mut parts, _) = req.into_parts();
        SiteKey::from_request_parts(&mut parts, &()).await.unwrap()
    }

    #[test]
    fn ports_are_stripped() {
        assert_eq!(strip_port("jazz.example:8080"), "jazz.example");
        assert_eq!(strip_port("jazz.example"), "jazz.example");
        assert_eq!(strip_port("[::1]:3000"), "::1");
    }

    #[tokio::test]
    async fn header_wins_over_host() {
        let req = Request::builder()
            .header(SITE_ID_HEADER, " jazz ")
            .header(HOST, "Rock.Example:80")
            .body(())
            .unwrap();
        let key = extract(req).await;
        assert_eq!(key.explicit.as_deref(), Some("jazz"));
        assert_eq!(key.host.as_deref(), Some("rock.example"));
        assert_eq!(key.key(), "jazz");
    }

    #[tokio::test]
    async fn missing_headers_extract_nothing() {
        let key = extract(Request::builder().body(()).unwrap()).await;
        assert_eq!(key, SiteKey::default());
    }
}
