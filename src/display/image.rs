//! Authenticated Image
//!
//! Displays a protected image by resource key. The component moves through
//! `Loading → Success | Error`, re-entering `Loading` whenever its key
//! changes. An empty key skips loading altogether.
//!
//! Every load is tagged with a generation number. When the load finishes the
//! component commits the outcome only if the generation is still current and
//! the component is still mounted; otherwise the outcome is dropped and a
//! successful handle's lease is released right away. The component holds a
//! lease on at most one handle, and gives it back exactly once when it leaves
//! that key or is unmounted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::media::{FetchFailed, FetchOutcome, ImageLoader, LocalHandle};

/// Shown when loading fails and no fallback image is configured
pub const PLACEHOLDER_TEXT: &str = "이미지를 불러올 수 없습니다";

pub type LoadCallback = Arc<dyn Fn(&LocalHandle) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&FetchFailed) + Send + Sync>;

/// Inputs of an `AuthenticatedImage`
#[derive(Clone, Default)]
pub struct ImageProps {
    /// Resource key of the protected image
    pub src: Option<String>,
    /// Plain image URL shown when loading fails
    pub fallback_src: Option<String>,
    pub alt: String,
    pub on_load: Option<LoadCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl ImageProps {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: Some(src.into()),
            ..Default::default()
        }
    }

    pub fn fallback(mut self, src: impl Into<String>) -> Self {
        self.fallback_src = Some(src.into());
        self
    }

    pub fn alt(mut self, alt: impl Into<String>) -> Self {
        self.alt = alt.into();
        self
    }

    pub fn on_load(mut self, callback: impl Fn(&LocalHandle) + Send + Sync + 'static) -> Self {
        self.on_load = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&FetchFailed) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

/// Display state of one component instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayState {
    /// No resource key; nothing to load
    Idle,
    Loading,
    Success(LocalHandle),
    Error(FetchFailed),
}

/// What the component draws
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Nothing,
    Spinner,
    Image { src: String, alt: String },
    Fallback { src: String, alt: String },
    Placeholder { text: &'static str },
}

struct Inner {
    generation: u64,
    src: Option<String>,
    /// Leased handle for `src`, once loaded
    owned: Option<LocalHandle>,
    mounted: bool,
}

struct Shared {
    loader: ImageLoader,
    fallback_src: Option<String>,
    alt: String,
    on_load: Option<LoadCallback>,
    on_error: Option<ErrorCallback>,
    inner: Mutex<Inner>,
    state: watch::Sender<DisplayState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn switch_to(self: &Arc<Self>, src: Option<String>) {
        let src = src.filter(|s| !s.is_empty());

        let mut inner = self.lock();
        if !inner.mounted || inner.src == src {
            return;
        }

        inner.generation += 1;
        inner.src = src.clone();

        if let Some(previous) = inner.owned.take() {
            tracing::debug!(handle = %previous, "Leaving image; releasing handle");
            self.loader.release(&previous);
        }

        match src {
            Some(key) => {
                self.state.send_replace(DisplayState::Loading);
                self.begin(inner.generation, key);
            }
            None => {
                self.state.send_replace(DisplayState::Idle);
            }
        }
    }

    fn begin(self: &Arc<Self>, generation: u64, key: String) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = shared.loader.acquire(&key).await;
            shared.settle(generation, &key, outcome);
        });
    }

    fn settle(&self, generation: u64, key: &str, outcome: FetchOutcome) {
        let mut inner = self.lock();

        if !inner.mounted || inner.generation != generation {
            tracing::debug!(key = %key, generation, "Discarding stale image load");
            if let Ok(handle) = &outcome {
                self.loader.release(handle);
            }
            return;
        }

        match outcome {
            Ok(handle) => {
                inner.owned = Some(handle.clone());
                self.state.send_replace(DisplayState::Success(handle.clone()));
                drop(inner);

                if let Some(on_load) = &self.on_load {
                    on_load(&handle);
                }
            }
            Err(error) => {
                self.state.send_replace(DisplayState::Error(error.clone()));
                drop(inner);

                if let Some(on_error) = &self.on_error {
                    on_error(&error);
                }
            }
        }
    }

    fn unmount(&self) {
        let mut inner = self.lock();
        if !inner.mounted {
            return;
        }
        inner.mounted = false;
        inner.generation += 1;

        if let Some(handle) = inner.owned.take() {
            self.loader.release(&handle);
        }
    }
}

/// Image element backed by an authenticated fetch
///
/// Must be mounted inside a tokio runtime. Dropping it unmounts it.
pub struct AuthenticatedImage {
    shared: Arc<Shared>,
}

impl AuthenticatedImage {
    pub fn mount(loader: ImageLoader, props: ImageProps) -> Self {
        let (state, _) = watch::channel(DisplayState::Idle);
        let shared = Arc::new(Shared {
            loader,
            fallback_src: props.fallback_src,
            alt: props.alt,
            on_load: props.on_load,
            on_error: props.on_error,
            inner: Mutex::new(Inner {
                generation: 0,
                src: None,
                owned: None,
                mounted: true,
            }),
            state,
        });

        shared.switch_to(props.src);
        Self { shared }
    }

    /// Point the component at a different resource key
    ///
    /// Setting the current key again is a no-op.
    pub fn set_src(&self, src: Option<String>) {
        self.shared.switch_to(src);
    }

    pub fn src(&self) -> Option<String> {
        self.shared.lock().src.clone()
    }

    pub fn state(&self) -> DisplayState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DisplayState> {
        self.shared.state.subscribe()
    }

    /// Wait until the current load has finished
    pub async fn settled(&self) -> DisplayState {
        let mut receiver = self.subscribe();
        receiver
            .wait_for(|state| !matches!(state, DisplayState::Loading))
            .await
            .map(|state| state.clone())
            .unwrap_or_else(|_| self.state())
    }

    pub fn render(&self) -> Rendered {
        match &*self.shared.state.borrow() {
            DisplayState::Idle => Rendered::Nothing,
            DisplayState::Loading => Rendered::Spinner,
            DisplayState::Success(handle) => Rendered::Image {
                src: handle.to_string(),
                alt: self.shared.alt.clone(),
            },
            DisplayState::Error(_) => match &self.shared.fallback_src {
                Some(src) => Rendered::Fallback {
                    src: src.clone(),
                    alt: self.shared.alt.clone(),
                },
                None => Rendered::Placeholder {
                    text: PLACEHOLDER_TEXT,
                },
            },
        }
    }

    pub fn unmount(self) {
        drop(self);
    }
}

impl Drop for AuthenticatedImage {
    fn drop(&mut self) {
        self.shared.unmount();
    }
}
