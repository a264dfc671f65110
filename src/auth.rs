//! Bearer-token check for the HTTP transport.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use subtle::ConstantTimeEq;

const UNAUTHORIZED_BODY: &str = r#"{"jsonrpc":"2.0","error":{"code":-32600,"message":"Unauthorized: missing or invalid bearer token"},"id":null}"#;

/// The single shared secret HTTP clients must present.
#[derive(Clone)]
pub struct AuthToken {
    secret: Arc<str>,
    generated: bool,
}

impl std::fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthToken")
            .field("secret", &"***")
            .field("generated", &self.generated)
            .finish()
    }
}

impl AuthToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: Arc::from(secret.into()),
            generated: false,
        }
    }

    /// 32 random bytes, URL-safe base64 without padding.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            secret: Arc::from(URL_SAFE_NO_PAD.encode(bytes)),
            generated: true,
        }
    }

    /// Use the configured token, or generate one and log it once.
    pub fn from_config(configured: Option<&str>) -> Self {
        match configured.filter(|t| !t.is_empty()) {
            Some(token) => Self::new(token),
            None => {
                let token = Self::generate();
                tracing::warn!(
                    token = %token.secret,
                    "POSTGRES_MCP_TOKEN not set; generated a bearer token for this run"
                );
                token
            }
        }
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn verify(&self, presented: &str) -> bool {
        presented.as_bytes().ct_eq(self.secret.as_bytes()).into()
    }

    /// Check an `Authorization` header value.
    pub fn verify_header(&self, value: Option<&str>) -> bool {
        value
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|presented| self.verify(presented.trim()))
            .unwrap_or(false)
    }
}

pub fn unauthorized() -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::WWW_AUTHENTICATE, "Bearer")
        .body(Body::from(UNAUTHORIZED_BODY))
        .unwrap_or_else(|_| {
            let mut resp = Response::new(Body::from(UNAUTHORIZED_BODY));
            *resp.status_mut() = StatusCode::UNAUTHORIZED;
            resp
        })
}

pub async fn require_auth(
    State(token): State<AuthToken>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    if !token.verify_header(presented) {
        tracing::debug!(path = %request.uri().path(), "rejected unauthenticated request");
        return unauthorized();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify() {
        let token = AuthToken::new("s3cret-token");
        assert!(token.verify("s3cret-token"));
        assert!(!token.verify("s3cret-tokeN"));
        assert!(!token.verify(""));
        assert!(!token.verify("s3cret-token-longer"));
    }

    #[test]
    fn test_verify_header() {
        let token = AuthToken::new("abc123");
        assert!(token.verify_header(Some("Bearer abc123")));
        assert!(!token.verify_header(Some("Basic abc123")));
        assert!(!token.verify_header(Some("abc123")));
        assert!(!token.verify_header(None));
    }

    #[test]
    fn test_generated_token() {
        let a = AuthToken::from_config(None);
        let b = AuthToken::from_config(Some(""));
        assert!(a.is_generated() && b.is_generated());
        assert_eq!(a.secret().len(), 43);
        assert_ne!(a.secret(), b.secret());
        assert!(!a.secret().contains('='));

        let c = AuthToken::from_config(Some("fixed"));
        assert!(!c.is_generated());
        assert_eq!(c.secret(), "fixed");
    }

    #[test]
    fn test_debug_hides_secret() {
        let token = AuthToken::new("do-not-print");
        assert!(!format!("{token:?}").contains("do-not-print"));
    }

    #[test]
    fn test_unauthorized_response() {
        let resp = unauthorized();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            resp.headers().get(header::WWW_AUTHENTICATE).map(|v| v.as_bytes()),
            Some(&b"Bearer"[..])
        );
    }
}
