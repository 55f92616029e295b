//! Backend Sources
//!
//! The backend is an external collaborator that turns a resource key into
//! binary bytes. `BinarySource` is the seam; `HttpImageSource` is the
//! production implementation over the Synergym REST API.

mod http;

pub use http::{HttpImageSource, SourceConfig, StaticToken, TokenProvider};

use async_trait::async_trait;
use std::sync::Arc;

use crate::media::FetchFailed;

/// Default content type when the backend does not send one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Binary payload returned by a source
#[derive(Debug, Clone)]
pub struct FetchedBlob {
    pub bytes: Arc<[u8]>,
    pub content_type: String,
}

impl FetchedBlob {
    pub fn new(bytes: impl Into<Arc<[u8]>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }
}

/// Credentialed retrieval of protected binary resources
#[async_trait]
pub trait BinarySource: Send + Sync {
    /// Fetch the resource named by `key`
    async fn fetch(&self, key: &str) -> Result<FetchedBlob, FetchFailed>;
}
