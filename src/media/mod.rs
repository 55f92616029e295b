//! Authenticated Media
//!
//! Protected images cannot be loaded by a plain image URL because the
//! backend requires a bearer credential. This module fetches them with the
//! credential attached and exposes the bytes through local handles.
//!
//! ## Architecture
//!
//! - **HandleRegistry**: allocates and revokes local handles
//! - **ObjectUrlCache**: resource key → handle, one entry per key
//! - **ImageLoader**: cached, single-flight authenticated fetches
//! - **Preview**: handles for files selected for upload
//!
//! ## Lifecycle
//!
//! 1. A cache entry is created on the first successful fetch for a key
//! 2. Later fetches for the key return the same handle
//! 3. Revoking the handle (or clearing the cache) destroys the entry
//! 4. Preview handles bypass the cache and are revoked by their owner

mod cache;
mod error;
mod handle;
mod loader;
mod preview;

pub use cache::{ObjectUrlCache, Release};
pub use error::{FetchFailed, MediaError, MediaResult};
pub use handle::{Blob, HandleRegistry, LocalHandle, Provenance, RegistryStats};
pub use loader::{FetchOutcome, ImageLoader, LoaderStats};
pub use preview::{create_image_preview, SelectedFile, UploadPreview};
