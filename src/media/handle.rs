//! Local Handles and the Handle Registry
//!
//! A `LocalHandle` is an opaque `blob:` URL referring to binary data held in
//! memory. The `HandleRegistry` plays the role of the host platform: it
//! allocates handles for payloads and releases them on revocation. A revoked
//! handle no longer resolves, the same way a revoked object URL renders as a
//! broken image.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Opaque reference to in-memory binary data
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalHandle(Arc<str>);

impl LocalHandle {
    /// The handle as a URL string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the bytes behind a handle came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// Fetched from the backend under this resource key
    Remote(String),
    /// Read from a file the user selected
    LocalFile(String),
}

/// Payload behind a live handle
#[derive(Debug, Clone)]
pub struct Blob {
    pub bytes: Arc<[u8]>,
    pub content_type: String,
    pub provenance: Provenance,
    pub created_at: DateTime<Utc>,
}

impl Blob {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Allocates and releases local handles
pub struct HandleRegistry {
    /// Prefix for issued handles, e.g. "http://localhost:3000"
    origin: String,
    /// Live handles: handle → payload
    live: Mutex<HashMap<LocalHandle, Blob>>,
    created: AtomicU64,
    revoked: AtomicU64,
}

impl HandleRegistry {
    /// Create a registry issuing handles under the given origin
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into().trim_end_matches('/').to_string(),
            live: Mutex::new(HashMap::new()),
            created: AtomicU64::new(0),
            revoked: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<LocalHandle, Blob>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a new handle for a payload
    ///
    /// Every call yields a distinct handle, even for identical bytes.
    pub fn create(
        &self,
        bytes: Arc<[u8]>,
        content_type: impl Into<String>,
        provenance: Provenance,
    ) -> LocalHandle {
        let handle = LocalHandle(format!("blob:{}/{}", self.origin, Uuid::new_v4()).into());
        let blob = Blob {
            bytes,
            content_type: content_type.into(),
            provenance,
            created_at: Utc::now(),
        };

        tracing::debug!(handle = %handle, bytes = blob.len(), "Handle created");

        self.lock().insert(handle.clone(), blob);
        self.created.fetch_add(1, Ordering::Relaxed);
        handle
    }

    /// Release a handle
    ///
    /// Returns false if the handle is unknown or was already revoked.
    pub fn revoke(&self, handle: &LocalHandle) -> bool {
        let released = self.lock().remove(handle).is_some();
        if released {
            self.revoked.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(handle = %handle, "Handle revoked");
        }
        released
    }

    /// Payload behind a live handle
    pub fn resolve(&self, handle: &LocalHandle) -> Option<Blob> {
        self.lock().get(handle).cloned()
    }

    pub fn is_live(&self, handle: &LocalHandle) -> bool {
        self.lock().contains_key(handle)
    }

    pub fn stats(&self) -> RegistryStats {
        let live = self.lock();
        RegistryStats {
            live_handles: live.len(),
            live_bytes: live.values().map(Blob::len).sum(),
            created: self.created.load(Ordering::Relaxed),
            revoked: self.revoked.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("origin", &self.origin)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Snapshot of registry usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub live_handles: usize,
    pub live_bytes: usize,
    pub created: u64,
    pub revoked: u64,
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} live handles ({} bytes), {} created, {} revoked",
            self.live_handles, self.live_bytes, self.created, self.revoked
        )
    }
}
