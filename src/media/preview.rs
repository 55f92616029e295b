//! Local Previews
//!
//! Upload forms show the selected file before it is sent. The preview handle
//! is created straight from the file's bytes: no cache, no network. Whoever
//! creates it owns it and must revoke it; `UploadPreview` does that for a
//! form that shows one file at a time.

use std::path::Path;
use std::sync::Arc;

use super::error::{MediaError, MediaResult};
use super::handle::{HandleRegistry, LocalHandle, Provenance};

/// A file the user picked, held in memory
#[derive(Debug, Clone)]
pub struct SelectedFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Arc<[u8]>,
}

impl SelectedFile {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, inferring its content type from the extension
    pub async fn from_path(path: &Path) -> MediaResult<Self> {
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(Self::new(name, content_type_for(path), bytes))
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        Some("heic") => "image/heic",
        Some("mp4") => "video/mp4",
        Some("txt") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Create a preview handle for a selected file
///
/// The handle is never registered in the object-URL cache, so clearing the
/// cache leaves it alone. The caller must revoke it.
pub fn create_image_preview(registry: &HandleRegistry, file: &SelectedFile) -> LocalHandle {
    registry.create(
        Arc::clone(&file.bytes),
        file.content_type.clone(),
        Provenance::LocalFile(file.name.clone()),
    )
}

/// Preview slot of an upload form
///
/// Holds at most one preview; replacing or clearing it revokes the old
/// handle, and so does dropping the form.
pub struct UploadPreview {
    registry: Arc<HandleRegistry>,
    current: Option<(LocalHandle, SelectedFile)>,
}

impl UploadPreview {
    pub fn new(registry: Arc<HandleRegistry>) -> Self {
        Self {
            registry,
            current: None,
        }
    }

    /// Show a newly selected file
    pub fn select(&mut self, file: SelectedFile) -> MediaResult<LocalHandle> {
        if !file.is_image() {
            return Err(MediaError::NotAnImage {
                name: file.name,
                content_type: file.content_type,
            });
        }

        let handle = create_image_preview(&self.registry, &file);
        tracing::debug!(file = %file.name, handle = %handle, "Upload preview selected");

        if let Some((previous, _)) = self.current.replace((handle.clone(), file)) {
            self.registry.revoke(&previous);
        }
        Ok(handle)
    }

    /// Remove the preview, e.g. after a successful upload
    pub fn clear(&mut self) {
        if let Some((handle, _)) = self.current.take() {
            self.registry.revoke(&handle);
        }
    }

    pub fn handle(&self) -> Option<&LocalHandle> {
        self.current.as_ref().map(|(handle, _)| handle)
    }

    /// The file to submit with the form
    pub fn file(&self) -> Option<&SelectedFile> {
        self.current.as_ref().map(|(_, file)| file)
    }
}

impl Drop for UploadPreview {
    fn drop(&mut self) {
        self.clear();
    }
}
