//! # Synergym Media
//!
//! Authenticated image loading for the Synergym client. Profile photos,
//! posture-analysis captures and post images sit behind the backend's bearer
//! authentication, so they are fetched with the credential attached and
//! exposed through local handles (`blob:` URLs) whose lifetime is managed
//! explicitly.
//!
//! ## Features
//!
//! - **Single-flight fetches**: one network request and one handle per key
//! - **Object-URL cache**: repeated requests reuse the existing handle
//! - **Exactly-once revocation**: leased handles are released by their holders
//! - **Upload previews**: handles for selected files, outside the cache
//!
//! ## Modules
//!
//! - [`media`]: Handles, cache, loader and previews
//! - [`source`]: Backend sources (HTTP with bearer credentials)
//! - [`display`]: The authenticated image component
//! - [`config`]: File and environment configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use synergym_media::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default();
//!
//!     let tokens = Arc::new(StaticToken::new(config.backend.token.clone()));
//!     let source = Arc::new(HttpImageSource::new(&config.backend.source_config(), tokens)?);
//!     let registry = Arc::new(HandleRegistry::new(config.media.origin.clone()));
//!     let loader = ImageLoader::new(source, registry);
//!
//!     let image = AuthenticatedImage::mount(
//!         loader.clone(),
//!         ImageProps::new("/users/204/profile-image").fallback("/static/avatar.png"),
//!     );
//!     image.settled().await;
//!     println!("{:?}", image.render());
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod display;
pub mod media;
pub mod source;

pub use media::{
    create_image_preview, Blob, FetchFailed, FetchOutcome, HandleRegistry, ImageLoader,
    LoaderStats, LocalHandle, MediaError, MediaResult, ObjectUrlCache, Provenance,
    RegistryStats, Release, SelectedFile, UploadPreview,
};

pub use source::{
    BinarySource, FetchedBlob, HttpImageSource, SourceConfig, StaticToken, TokenProvider,
};

pub use display::{AuthenticatedImage, DisplayState, ImageProps, Rendered, PLACEHOLDER_TEXT};

pub use config::{BackendConfig, Config, ConfigError, LoggingConfig, MediaConfig};
