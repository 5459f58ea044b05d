//! Sync client: owner of the canonical state.
//!
//! DESIGN
//! ======
//! `SyncClient` is a cheap clonable handle around one canonical
//! `CanvasState`, published through a `tokio::sync::watch` channel as an
//! `Arc` snapshot. Every transition runs inside the channel's critical
//! section and copies on write, so stream events, request completions and
//! user commands never interleave inside one transition and readers always
//! see some committed snapshot.
//!
//! The push-stream observer holds only a weak reference to the client, so a
//! dropped client stops applying events and releases its stream slot.

#[cfg(test)]
#[path = "sync_test.rs"]
mod sync_test;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, SyncConfig};
use crate::error::ErrorCode;
use crate::net::api::{ApiError, HttpApi, RemoteApi};
use crate::net::event::SyncEvent;
use crate::net::stream::{ObserverId, StreamManager, StreamStatus};
use crate::state::canvas::CanvasState;
use crate::state::layout::PositionCache;
use crate::state::reducer::{self, ReduceError};

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("server snapshot rejected: {0}")]
    Snapshot(#[from] ReduceError),

    #[error("agent not found: {0}")]
    UnknownAgent(String),

    #[error("connection not found: {0}")]
    UnknownEdge(String),

    #[error("{0} is still awaiting server confirmation")]
    PendingConfirmation(String),

    #[error("push stream gave up reconnecting")]
    ReconnectExhausted,
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Api(e) => e.error_code(),
            Self::Config(e) => e.error_code(),
            Self::Snapshot(e) => e.error_code(),
            Self::UnknownAgent(_) => "E_UNKNOWN_AGENT",
            Self::UnknownEdge(_) => "E_UNKNOWN_EDGE",
            Self::PendingConfirmation(_) => "E_PENDING_CONFIRMATION",
            Self::ReconnectExhausted => "E_RECONNECT_EXHAUSTED",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.retryable(),
            Self::PendingConfirmation(_) | Self::ReconnectExhausted => true,
            _ => false,
        }
    }
}

// =============================================================================
// CLIENT
// =============================================================================

#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn RemoteApi>,
    stream: StreamManager,
    layout: Arc<PositionCache>,
    state: watch::Sender<Arc<CanvasState>>,
    subscription: Mutex<Option<ObserverId>>,
}

impl SyncClient {
    #[must_use]
    pub fn new(api: Arc<dyn RemoteApi>, stream: StreamManager, layout: Arc<PositionCache>) -> Self {
        let (state, _) = watch::channel(Arc::new(CanvasState::default()));
        Self { inner: Arc::new(Inner { api, stream, layout, state, subscription: Mutex::new(None) }) }
    }

    /// Wire the HTTP client, stream manager and file-backed layout cache.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Api`] if the HTTP client cannot be built.
    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let api = HttpApi::from_config(config)?;
        let stream = StreamManager::new(config.stream.clone());
        let layout = PositionCache::open(config.layout_path.clone());
        Ok(Self::new(Arc::new(api), stream, Arc::new(layout)))
    }

    /// Current committed snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<CanvasState> {
        Arc::clone(&self.inner.state.borrow())
    }

    /// Receiver notified after every transition.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Arc<CanvasState>> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn stream(&self) -> &StreamManager {
        &self.inner.stream
    }

    #[must_use]
    pub fn layout(&self) -> &PositionCache {
        &self.inner.layout
    }

    pub(crate) fn api(&self) -> &dyn RemoteApi {
        self.inner.api.as_ref()
    }

    /// Run one transition against a private copy of the canonical state.
    pub(crate) fn update(&self, f: impl FnOnce(&mut CanvasState)) {
        self.inner.state.send_modify(|state| f(Arc::make_mut(state)));
    }

    /// Like [`SyncClient::update`], but `f` may decline by returning `false`,
    /// in which case nothing is published.
    pub(crate) fn update_if(&self, f: impl FnOnce(&mut CanvasState) -> bool) -> bool {
        self.inner.state.send_if_modified(|state| {
            let mut next = CanvasState::clone(state);
            if !f(&mut next) {
                return false;
            }
            *state = Arc::new(next);
            true
        })
    }

    /// Record `error` as the surfaced message.
    pub(crate) fn fail(&self, error: &SyncError) {
        let message = error.to_string();
        self.update(|state| state.error = Some(message));
    }

    pub fn clear_error(&self) {
        self.inner.state.send_if_modified(|state| {
            if state.error.is_none() {
                return false;
            }
            Arc::make_mut(state).error = None;
            true
        });
    }

    /// Fetch agents and connections over REST and replace the snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first request failure, or [`SyncError::Snapshot`] when
    /// the server's lists are inconsistent. Either way `loading` is cleared
    /// and `error` carries the message.
    pub async fn load(&self) -> Result<(), SyncError> {
        self.update(|state| state.loading = true);

        let fetched = tokio::try_join!(self.inner.api.list_agents(), self.inner.api.list_connections());
        let (agents, connections) = match fetched {
            Ok(lists) => lists,
            Err(e) => return Err(self.load_failed(e.into())),
        };

        let layout = self.inner.layout.as_ref();
        let mut rejected = None;
        self.inner.state.send_modify(|state| {
            match reducer::replace_snapshot(state, &agents, &connections, layout) {
                Ok(mut next) => {
                    next.loading = false;
                    next.error = None;
                    *state = Arc::new(next);
                }
                Err(e) => rejected = Some(e),
            }
        });
        if let Some(e) = rejected {
            return Err(self.load_failed(e.into()));
        }

        info!(agents = agents.len(), edges = connections.len(), "state loaded");
        Ok(())
    }

    fn load_failed(&self, error: SyncError) -> SyncError {
        warn!(error = %error, code = error.error_code(), "state load failed");
        let message = error.to_string();
        self.update(|state| {
            state.loading = false;
            state.error = Some(message);
        });
        error
    }

    /// Attach this client to the push stream. Calling it again while
    /// attached is a no-op, except after the stream has given up, when it
    /// starts a fresh session.
    pub fn subscribe(&self) {
        let mut subscription = self.inner.subscription();
        if let Some(id) = *subscription {
            if self.inner.stream.status() != StreamStatus::Failed {
                return;
            }
            self.inner.stream.remove_observer(id);
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let id = self.inner.stream.connect(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_event(event);
            }
        });
        debug!(observer = ?id, "sync client subscribed");
        *subscription = Some(id);
    }

    /// Detach from the push stream; the last detach closes the connection.
    pub fn unsubscribe(&self) {
        if let Some(id) = self.inner.subscription().take() {
            self.inner.stream.remove_observer(id);
            debug!(observer = ?id, "sync client unsubscribed");
        }
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.inner.subscription().is_some()
    }

    /// Status of the push stream, failing once reconnects are exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ReconnectExhausted`] when the stream is `Failed`.
    pub fn stream_health(&self) -> Result<StreamStatus, SyncError> {
        match self.inner.stream.status() {
            StreamStatus::Failed => Err(SyncError::ReconnectExhausted),
            status => Ok(status),
        }
    }

    /// Feed one event through the reducer, as the stream observer does.
    pub fn apply_event(&self, event: &SyncEvent) {
        self.inner.apply_event(event);
    }
}

impl Inner {
    fn subscription(&self) -> MutexGuard<'_, Option<ObserverId>> {
        self.subscription.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_event(&self, event: &SyncEvent) {
        let layout = self.layout.as_ref();
        self.state.send_if_modified(|state| {
            let next = reducer::apply(state, event, layout);
            if next == **state {
                return false;
            }
            *state = Arc::new(next);
            true
        });
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let subscription = self.subscription.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(id) = subscription {
            self.stream.remove_observer(id);
        }
    }
}
