//! HTTP Image Source
//!
//! Fetches protected images from the Synergym REST API with a bearer
//! credential attached. Credential sourcing stays outside this crate behind
//! `TokenProvider`.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use super::{BinarySource, FetchedBlob, DEFAULT_CONTENT_TYPE};
use crate::media::{FetchFailed, MediaError, MediaResult};

/// Supplies the bearer token for each request
pub trait TokenProvider: Send + Sync {
    /// Current access token, if signed in
    fn bearer_token(&self) -> Option<String>;
}

/// Fixed token, typically from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()))
    }
}

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Configuration for the HTTP source
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Base URL of the backend API (e.g., "http://localhost:8080/api")
    pub base_url: String,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Backend source over reqwest
pub struct HttpImageSource {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpImageSource {
    /// Create a source for the configured backend
    pub fn new(config: &SourceConfig, tokens: Arc<dyn TokenProvider>) -> MediaResult<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(MediaError::InvalidBaseUrl(config.base_url.clone()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            tokens,
        })
    }

    /// Absolute URL for a resource key
    ///
    /// Absolute keys pass through; paths are joined onto the base URL.
    pub fn resolve_url(&self, key: &str) -> String {
        if key.starts_with("http://") || key.starts_with("https://") {
            key.to_string()
        } else {
            format!("{}/{}", self.base_url, key.trim_start_matches('/'))
        }
    }
}

#[async_trait]
impl BinarySource for HttpImageSource {
    async fn fetch(&self, key: &str) -> Result<FetchedBlob, FetchFailed> {
        let url = self.resolve_url(key);

        let mut request = self.client.get(&url);
        if let Some(token) = self.tokens.bearer_token() {
            request = request.bearer_auth(&token);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url = %url, status = status.as_u16(), "Backend rejected image request");
            return Err(FetchFailed::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchFailed::Decode(e.to_string()))?;

        Ok(FetchedBlob::new(&bytes[..], content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, State},
        http::{header, HeaderMap, StatusCode},
        response::IntoResponse,
        routing::get,
        Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TOKEN: &str = "test-token";

    async fn profile_image(
        State(hits): State<Arc<AtomicUsize>>,
        Path(id): Path<u32>,
        headers: HeaderMap,
    ) -> axum::response::Response {
        hits.fetch_add(1, Ordering::SeqCst);

        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some("Bearer test-token");
        if !authorized {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        if id != 204 {
            return StatusCode::NOT_FOUND.into_response();
        }

        ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, b'P', b'N', b'G']).into_response()
    }

    async fn spawn_backend() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/api/users/:id/profile-image", get(profile_image))
            .with_state(Arc::clone(&hits));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/api", addr), hits)
    }

    fn source(base_url: &str, token: Option<&str>) -> HttpImageSource {
        let config = SourceConfig {
            base_url: base_url.to_string(),
            request_timeout_secs: 5,
        };
        HttpImageSource::new(&config, Arc::new(StaticToken::new(token.map(String::from)))).unwrap()
    }

    #[test]
    fn test_resolve_url() {
        let source = source("http://localhost:8080/api/", None);
        assert_eq!(
            source.resolve_url("/users/204/profile-image"),
            "http://localhost:8080/api/users/204/profile-image"
        );
        assert_eq!(
            source.resolve_url("posts/1/images/1"),
            "http://localhost:8080/api/posts/1/images/1"
        );
        assert_eq!(
            source.resolve_url("https://cdn.example.com/a.png"),
            "https://cdn.example.com/a.png"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let config = SourceConfig {
            base_url: "localhost:8080".to_string(),
            request_timeout_secs: 5,
        };
        let result = HttpImageSource::new(&config, Arc::new(StaticToken::default()));
        assert!(matches!(result, Err(MediaError::InvalidBaseUrl(_))));
    }

    #[test]
    fn test_static_token_ignores_empty() {
        assert_eq!(StaticToken::new(Some(String::new())).bearer_token(), None);
        assert_eq!(
            StaticToken::new(Some("abc".into())).bearer_token(),
            Some("abc".to_string())
        );
    }

    #[tokio::test]
    async fn test_fetch_with_bearer_token() {
        let (base_url, hits) = spawn_backend().await;
        let source = source(&base_url, Some(TOKEN));

        let blob = source.fetch("/users/204/profile-image").await.unwrap();
        assert_eq!(&*blob.bytes, &[0x89, b'P', b'N', b'G']);
        assert_eq!(blob.content_type, "image/png");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_without_token_is_rejected() {
        let (base_url, _hits) = spawn_backend().await;
        let source = source(&base_url, None);

        let err = source.fetch("/users/204/profile-image").await.unwrap_err();
        assert_eq!(err, FetchFailed::Status(401));
    }

    #[tokio::test]
    async fn test_fetch_missing_resource() {
        let (base_url, _hits) = spawn_backend().await;
        let source = source(&base_url, Some(TOKEN));

        let err = source.fetch("/users/999/profile-image").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fetch_unreachable_backend() {
        // Bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let source = source(&format!("http://{}", addr), Some(TOKEN));
        let err = source.fetch("/users/204/profile-image").await.unwrap_err();
        assert!(matches!(
            err,
            FetchFailed::Unavailable | FetchFailed::Transport(_)
        ));
    }
}
