//! Authenticated Image Loader
//!
//! Turns a resource key into a local handle: consults the object-URL cache,
//! otherwise fetches the bytes from the backend and caches the new handle.
//!
//! Requests are single-flight per key. The first caller for an uncached key
//! spawns the network request; every caller (the first included) waits on a
//! oneshot channel for the shared outcome. The request runs on its own task,
//! so a caller that stops waiting never strands the others, and the handle is
//! still committed to the cache where it can be revoked.
//!
//! Callers of `acquire` wait as lease holders: their leases are counted when
//! the request completes, under the same lock that commits the handle, so a
//! shared handle is never revoked while a waiter is about to receive it.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::oneshot;

use super::cache::{ObjectUrlCache, Release};
use super::error::FetchFailed;
use super::handle::{HandleRegistry, LocalHandle, Provenance, RegistryStats};
use crate::source::{BinarySource, FetchedBlob};

/// Outcome delivered to every caller of a fetch
pub type FetchOutcome = Result<LocalHandle, FetchFailed>;

/// A caller waiting on an in-flight request
enum Waiter {
    Fetch(oneshot::Sender<FetchOutcome>),
    Lease(oneshot::Sender<Result<Lease, FetchFailed>>),
}

enum Delivery {
    Fetch(oneshot::Sender<FetchOutcome>, FetchOutcome),
    Lease(oneshot::Sender<Result<Lease, FetchFailed>>, Result<Lease, FetchFailed>),
}

/// A lease counted on the caller's behalf, in transit to that caller
///
/// Dropped undelivered, it gives the lease back.
struct Lease {
    loader: ImageLoader,
    handle: Option<LocalHandle>,
}

impl Lease {
    fn into_handle(mut self) -> Option<LocalHandle> {
        self.handle.take()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(handle = %handle, "Lease undelivered; releasing");
            self.loader.release(&handle);
        }
    }
}

struct LoaderState {
    cache: ObjectUrlCache,
    /// Keys with a request in flight → callers awaiting the outcome
    in_flight: HashMap<String, Vec<Waiter>>,
}

/// Loads protected images into local handles
#[derive(Clone)]
pub struct ImageLoader {
    source: Arc<dyn BinarySource>,
    registry: Arc<HandleRegistry>,
    state: Arc<Mutex<LoaderState>>,
}

impl ImageLoader {
    /// Create a loader over a backend source and a handle registry
    pub fn new(source: Arc<dyn BinarySource>, registry: Arc<HandleRegistry>) -> Self {
        let cache = ObjectUrlCache::new(Arc::clone(&registry));
        Self {
            source,
            registry,
            state: Arc::new(Mutex::new(LoaderState {
                cache,
                in_flight: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn registry(&self) -> &Arc<HandleRegistry> {
        &self.registry
    }

    /// Fetch a protected resource as a local handle
    ///
    /// Returns the cached handle when there is one. Concurrent calls for the
    /// same uncached key share a single network request and a single handle.
    pub async fn fetch(&self, key: &str) -> FetchOutcome {
        if key.is_empty() {
            return Err(FetchFailed::EmptyKey);
        }

        let receiver = {
            let mut state = self.lock();
            if let Some(handle) = state.cache.get(key) {
                tracing::debug!(key = %key, handle = %handle, "Image cache hit");
                return Ok(handle);
            }

            let (sender, receiver) = oneshot::channel();
            self.wait_on(&mut state, key, Waiter::Fetch(sender));
            receiver
        };

        receiver.await.unwrap_or(Err(FetchFailed::Abandoned))
    }

    /// Fetch and take a lease on the resulting handle
    ///
    /// Leased handles stay live until every holder has called `release`.
    pub async fn acquire(&self, key: &str) -> FetchOutcome {
        if key.is_empty() {
            return Err(FetchFailed::EmptyKey);
        }

        let receiver = {
            let mut state = self.lock();
            if let Some(handle) = state.cache.get(key) {
                state.cache.retain(key, &handle);
                tracing::debug!(key = %key, handle = %handle, "Image cache hit; lease taken");
                return Ok(handle);
            }

            let (sender, receiver) = oneshot::channel();
            self.wait_on(&mut state, key, Waiter::Lease(sender));
            receiver
        };

        match receiver.await {
            Ok(Ok(lease)) => lease.into_handle().ok_or(FetchFailed::Abandoned),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FetchFailed::Abandoned),
        }
    }

    /// Join the in-flight request for `key`, starting one if there is none
    fn wait_on(&self, state: &mut LoaderState, key: &str, waiter: Waiter) {
        match state.in_flight.entry(key.to_string()) {
            Entry::Occupied(mut waiters) => {
                tracing::debug!(key = %key, "Joining in-flight image request");
                waiters.get_mut().push(waiter);
            }
            Entry::Vacant(slot) => {
                slot.insert(vec![waiter]);
                self.spawn_request(key.to_string());
            }
        }
    }

    /// Run the request on its own task and always report an outcome
    ///
    /// The source runs on an inner task so a panic inside it surfaces as a
    /// `JoinError` here instead of leaving the key in flight forever.
    fn spawn_request(&self, key: String) {
        let loader = self.clone();
        tokio::spawn(async move {
            let source = Arc::clone(&loader.source);
            let request_key = key.clone();
            let request = tokio::spawn(async move { source.fetch(&request_key).await });

            let result = match request.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Image request task failed");
                    Err(FetchFailed::Abandoned)
                }
            };
            loader.complete(&key, result);
        });
    }

    /// Commit a finished request and answer everyone waiting on it
    fn complete(&self, key: &str, result: Result<FetchedBlob, FetchFailed>) {
        let mut state = self.lock();
        let waiters = state.in_flight.remove(key).unwrap_or_default();

        let outcome = match result {
            Ok(blob) => {
                let handle = self.registry.create(
                    blob.bytes,
                    blob.content_type,
                    Provenance::Remote(key.to_string()),
                );
                state.cache.set(key, handle.clone());
                tracing::info!(
                    key = %key,
                    handle = %handle,
                    waiters = waiters.len(),
                    "Image loaded"
                );
                Ok(handle)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Image fetch failed");
                Err(e)
            }
        };

        // Leases are counted before the lock is released
        let mut deliveries = Vec::with_capacity(waiters.len());
        for waiter in waiters {
            let delivery = match waiter {
                Waiter::Fetch(sender) => Delivery::Fetch(sender, outcome.clone()),
                Waiter::Lease(sender) => {
                    let lease = outcome.clone().map(|handle| {
                        state.cache.retain(key, &handle);
                        Lease {
                            loader: self.clone(),
                            handle: Some(handle),
                        }
                    });
                    Delivery::Lease(sender, lease)
                }
            };
            deliveries.push(delivery);
        }
        drop(state);

        // Receiver gone means that caller stopped waiting; an undelivered
        // lease is released as it drops
        for delivery in deliveries {
            match delivery {
                Delivery::Fetch(sender, outcome) => {
                    let _ = sender.send(outcome);
                }
                Delivery::Lease(sender, lease) => {
                    let _ = sender.send(lease);
                }
            }
        }
    }

    /// Revoke a handle and drop any cache entry referencing it
    ///
    /// An empty or unknown handle is a no-op. Returns whether a live handle
    /// was released.
    pub fn revoke(&self, handle: &LocalHandle) -> bool {
        if handle.as_str().is_empty() {
            return false;
        }
        let mut state = self.lock();
        if let Some(key) = state.cache.remove_handle(handle) {
            tracing::debug!(key = %key, handle = %handle, "Evicted revoked handle");
        }
        self.registry.revoke(handle)
    }

    /// Give back a lease taken by `acquire`
    ///
    /// The last holder revokes the handle. A handle no longer in the cache is
    /// revoked directly, which is a no-op if it is already dead.
    pub fn release(&self, handle: &LocalHandle) {
        let release = self.lock().cache.release(handle);
        match release {
            Release::Held(holders) => {
                tracing::debug!(handle = %handle, holders, "Lease released; handle still held");
            }
            Release::Revoked(key) => {
                tracing::debug!(key = %key, handle = %handle, "Last lease released; handle revoked");
            }
            Release::NotCached => {
                self.registry.revoke(handle);
            }
        }
    }

    /// Cached handle for a key, without fetching
    pub fn cached(&self, key: &str) -> Option<LocalHandle> {
        self.lock().cache.get(key)
    }

    /// Revoke every cached handle
    pub fn clear_cache(&self) -> usize {
        let count = self.lock().cache.clear();
        tracing::info!(count, "Image cache cleared");
        count
    }

    pub fn stats(&self) -> LoaderStats {
        let state = self.lock();
        LoaderStats {
            cached_entries: state.cache.len(),
            in_flight: state.in_flight.len(),
            registry: self.registry.stats(),
        }
    }
}

/// Snapshot of loader usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoaderStats {
    pub cached_entries: usize,
    pub in_flight: usize,
    pub registry: RegistryStats,
}

impl std::fmt::Display for LoaderStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} cached, {} in flight; {}",
            self.cached_entries, self.in_flight, self.registry
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::testing::ScriptedSource;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;

    const PATIENCE: Duration = Duration::from_secs(5);

    struct PanickingSource;

    #[async_trait]
    impl BinarySource for PanickingSource {
        async fn fetch(&self, key: &str) -> Result<FetchedBlob, FetchFailed> {
            panic!("backend client crashed while fetching {}", key);
        }
    }

    fn setup() -> (Arc<ScriptedSource>, ImageLoader) {
        let source = Arc::new(ScriptedSource::new());
        let registry = Arc::new(HandleRegistry::new("http://localhost:3000"));
        let loader = ImageLoader::new(source.clone(), registry);
        (source, loader)
    }

    #[tokio::test]
    async fn test_second_fetch_hits_cache() {
        let (source, loader) = setup();
        source.respond("/users/204/profile-image", b"avatar");

        let first = loader.fetch("/users/204/profile-image").await.unwrap();
        let second = loader.fetch("/users/204/profile-image").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.calls("/users/204/profile-image"), 1);

        let blob = loader.registry().resolve(&first).unwrap();
        assert_eq!(&*blob.bytes, b"avatar");
    }

    #[tokio::test]
    async fn test_revoke_forces_refetch() {
        let (source, loader) = setup();
        source.respond("/a", b"x");

        let first = loader.fetch("/a").await.unwrap();
        assert!(loader.revoke(&first));
        assert!(loader.cached("/a").is_none());
        assert!(!loader.registry().is_live(&first));

        let second = loader.fetch("/a").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(source.calls("/a"), 2);
    }

    #[tokio::test]
    async fn test_revoke_unknown_handle_is_noop() {
        let (source, loader) = setup();
        source.respond("/a", b"x");
        let handle = loader.fetch("/a").await.unwrap();

        assert!(loader.revoke(&handle));
        assert!(!loader.revoke(&handle));
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_not_cached() {
        let (source, loader) = setup();

        let err = loader.fetch("/users/999/missing").await.unwrap_err();
        assert_eq!(err, FetchFailed::Status(404));
        assert!(loader.cached("/users/999/missing").is_none());

        source.respond("/users/999/missing", b"now-present");
        assert!(loader.fetch("/users/999/missing").await.is_ok());
        assert_eq!(source.calls("/users/999/missing"), 2);
    }

    #[tokio::test]
    async fn test_empty_key_skips_network() {
        let (_source, loader) = setup();
        assert_eq!(loader.fetch("").await, Err(FetchFailed::EmptyKey));
        assert_eq!(loader.stats().registry.created, 0);
    }

    #[tokio::test]
    async fn test_concurrent_fetches_share_one_request() {
        let (source, loader) = setup();
        source.respond("/posts/1/images/1", b"img");
        let gate = source.gate("/posts/1/images/1");

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let loader = loader.clone();
                tokio::spawn(async move { loader.fetch("/posts/1/images/1").await })
            })
            .collect();

        // Let every task register before the response is released
        tokio::task::yield_now().await;
        gate.open();

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert!(handles.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(source.calls("/posts/1/images/1"), 1);

        let stats = loader.stats();
        assert_eq!(stats.registry.live_handles, 1);
        assert_eq!(stats.cached_entries, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_request() {
        let (source, loader) = setup();
        source.fail("/flaky", FetchFailed::Status(503));
        let gate = source.gate("/flaky");

        let a = tokio::spawn({
            let loader = loader.clone();
            async move { loader.fetch("/flaky").await }
        });
        let b = tokio::spawn({
            let loader = loader.clone();
            async move { loader.fetch("/flaky").await }
        });

        tokio::task::yield_now().await;
        gate.open();

        assert_eq!(a.await.unwrap(), Err(FetchFailed::Status(503)));
        assert_eq!(b.await.unwrap(), Err(FetchFailed::Status(503)));
        assert_eq!(source.calls("/flaky"), 1);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_strand_others() {
        let (source, loader) = setup();
        source.respond("/a", b"x");
        let gate = source.gate("/a");

        let first = tokio::spawn({
            let loader = loader.clone();
            async move { loader.fetch("/a").await }
        });
        tokio::task::yield_now().await;
        first.abort();

        let second = tokio::spawn({
            let loader = loader.clone();
            async move { loader.fetch("/a").await }
        });
        tokio::task::yield_now().await;
        gate.open();

        let handle = second.await.unwrap().unwrap();
        assert_eq!(loader.cached("/a"), Some(handle));
        assert_eq!(source.calls("/a"), 1);
    }

    #[tokio::test]
    async fn test_leases_keep_shared_handle_alive() {
        let (source, loader) = setup();
        source.respond("/a", b"x");

        let first = loader.acquire("/a").await.unwrap();
        let second = loader.acquire("/a").await.unwrap();
        assert_eq!(first, second);

        loader.release(&first);
        assert!(loader.registry().is_live(&second));
        assert_eq!(loader.cached("/a"), Some(second.clone()));

        loader.release(&second);
        assert!(!loader.registry().is_live(&second));
        assert!(loader.cached("/a").is_none());
    }

    #[tokio::test]
    async fn test_release_after_explicit_revoke() {
        let (source, loader) = setup();
        source.respond("/a", b"x");

        let handle = loader.acquire("/a").await.unwrap();
        assert!(loader.revoke(&handle));
        loader.release(&handle);

        assert_eq!(loader.stats().registry.revoked, 1);
    }

    #[tokio::test]
    async fn test_clear_cache_revokes_all() {
        let (source, loader) = setup();
        source.respond("/a", b"x").respond("/b", b"y");

        let a = loader.fetch("/a").await.unwrap();
        let b = loader.fetch("/b").await.unwrap();

        assert_eq!(loader.clear_cache(), 2);
        assert!(!loader.registry().is_live(&a));
        assert!(!loader.registry().is_live(&b));
        assert_eq!(loader.stats().cached_entries, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_fetches_share_one_request_across_workers() {
        let (source, loader) = setup();
        source.respond("/posts/1/images/1", b"img");
        let gate = source.gate("/posts/1/images/1");

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let loader = loader.clone();
                tokio::spawn(async move { loader.fetch("/posts/1/images/1").await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.open();

        let mut handles = Vec::new();
        for task in tasks {
            let outcome = timeout(PATIENCE, task).await.expect("fetch never finished");
            handles.push(outcome.unwrap().unwrap());
        }

        assert!(handles.windows(2).all(|pair| pair[0] == pair[1]));
        assert_eq!(source.calls("/posts/1/images/1"), 1);

        let stats = loader.stats();
        assert_eq!(stats.registry.created, 1);
        assert_eq!(stats.registry.live_handles, 1);
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test]
    async fn test_waiting_leases_are_counted_before_delivery() {
        let (source, loader) = setup();
        source.respond("/a", b"x");
        let gate = source.gate("/a");

        let first = tokio::spawn({
            let loader = loader.clone();
            async move { loader.acquire("/a").await }
        });
        let second = tokio::spawn({
            let loader = loader.clone();
            async move { loader.acquire("/a").await }
        });
        tokio::task::yield_now().await;
        gate.open();

        // Released the moment it arrives, before the second holder looks at
        // its own outcome
        let handle = timeout(PATIENCE, first).await.unwrap().unwrap().unwrap();
        loader.release(&handle);
        assert!(loader.registry().is_live(&handle));
        assert_eq!(loader.cached("/a"), Some(handle.clone()));

        let shared = timeout(PATIENCE, second).await.unwrap().unwrap().unwrap();
        assert_eq!(shared, handle);
        assert_eq!(source.calls("/a"), 1);

        loader.release(&shared);
        assert!(!loader.registry().is_live(&shared));
    }

    #[tokio::test]
    async fn test_abandoned_lease_is_given_back() {
        let (source, loader) = setup();
        source.respond("/a", b"x");
        let gate = source.gate("/a");

        let abandoned = tokio::spawn({
            let loader = loader.clone();
            async move { loader.acquire("/a").await }
        });
        tokio::task::yield_now().await;
        abandoned.abort();
        let _ = abandoned.await;

        let kept = tokio::spawn({
            let loader = loader.clone();
            async move { loader.acquire("/a").await }
        });
        tokio::task::yield_now().await;
        gate.open();

        let handle = timeout(PATIENCE, kept).await.unwrap().unwrap().unwrap();
        loader.release(&handle);

        assert!(!loader.registry().is_live(&handle));
        assert!(loader.cached("/a").is_none());
    }

    #[tokio::test]
    async fn test_panicking_source_reports_abandoned() {
        let registry = Arc::new(HandleRegistry::new("http://localhost:3000"));
        let loader = ImageLoader::new(Arc::new(PanickingSource), registry);

        let first = timeout(PATIENCE, loader.fetch("/a")).await;
        assert_eq!(first, Ok(Err(FetchFailed::Abandoned)));
        assert_eq!(loader.stats().in_flight, 0);

        let second = timeout(PATIENCE, loader.acquire("/a")).await;
        assert_eq!(second, Ok(Err(FetchFailed::Abandoned)));
        assert_eq!(loader.stats().in_flight, 0);
        assert_eq!(loader.stats().registry.created, 0);
    }
}
