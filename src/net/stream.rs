//! Push-stream connection manager.
//!
//! DESIGN
//! ======
//! One `StreamManager` owns at most one websocket to the server and fans
//! decoded events out to every registered observer. Clones share the same
//! session, so the manager is injected into consumers rather than reached
//! through a global.
//!
//! A spawned driver task walks the lifecycle
//! `Disconnected -> Connecting -> Open -> Reconnecting -> Open | Failed`.
//! Session state lives behind a mutex; the driver only touches it in short
//! critical sections and never calls observers while holding the lock.
//!
//! Teardown bumps a generation counter and signals the driver through a
//! watch channel. The driver races every await (handshake, read, heartbeat,
//! backoff sleep) against that signal, and fan-out checks the generation, so
//! nothing scheduled by a torn-down session can reach an observer.
//!
//! ERROR HANDLING
//! ==============
//! Read errors, close frames and a silent peer all end the open phase exactly
//! once, so a failing transport schedules a single retry. The heartbeat sends
//! websocket pings; if no frame arrives within two periods the stream is
//! dropped as `heartbeat timeout`. Malformed messages are logged
//! and skipped; a panicking observer is caught and logged without affecting
//! the others.

#[cfg(test)]
#[path = "stream_test.rs"]
mod stream_test;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use super::event::SyncEvent;
use crate::config::StreamConfig;
use crate::error::ErrorCode;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Callback invoked for every event on the stream.
pub type Observer = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Handle returned by [`StreamManager::connect`] for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamStatus {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    /// Retries exhausted. Terminal until `connect` is called again.
    Failed,
}

// =============================================================================
// MANAGER
// =============================================================================

#[derive(Clone)]
pub struct StreamManager {
    shared: Arc<Shared>,
}

struct Shared {
    config: StreamConfig,
    session: Mutex<Session>,
}

#[derive(Default)]
struct Session {
    status: StreamStatus,
    attempt: u32,
    observers: Vec<(ObserverId, Observer)>,
    next_id: u64,
    generation: u64,
    shutdown: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl StreamManager {
    #[must_use]
    pub fn new(config: StreamConfig) -> Self {
        Self { shared: Arc::new(Shared { config, session: Mutex::new(Session::default()) }) }
    }

    /// Register `observer` and make sure exactly one stream is active.
    ///
    /// Attaching to an open stream delivers `connection_established` to the
    /// new observer alone. Attaching while a handshake or backoff is pending
    /// just queues the observer.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime when a driver must be spawned.
    pub fn connect<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let observer: Observer = Arc::new(observer);
        let mut session = self.shared.lock();
        let id = ObserverId(session.next_id);
        session.next_id += 1;
        session.observers.push((id, Arc::clone(&observer)));

        let status = session.status;
        match status {
            StreamStatus::Open => {
                drop(session);
                notify(id, &observer, &SyncEvent::ConnectionEstablished);
            }
            StreamStatus::Connecting | StreamStatus::Reconnecting => {
                debug!(observer = id.0, "stream observer queued");
            }
            StreamStatus::Disconnected | StreamStatus::Failed => {
                self.spawn_driver(&mut session);
            }
        }
        id
    }

    /// Deregister an observer. Removing the last one tears the stream down.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut session = self.shared.lock();
        let before = session.observers.len();
        session.observers.retain(|(existing, _)| *existing != id);
        let removed = session.observers.len() < before;

        if removed && session.observers.is_empty() {
            teardown(&mut session);
        }
        removed
    }

    /// Deliberate teardown: cancel pending timers, close with a normal
    /// closure code and forget every observer.
    pub fn disconnect(&self) {
        let mut session = self.shared.lock();
        teardown(&mut session);
    }

    /// Tear down and wait for the driver to finish its closing handshake.
    pub async fn shutdown(&self) {
        let task = {
            let mut session = self.shared.lock();
            teardown(&mut session);
            session.task.take()
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "stream driver ended abnormally");
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.shared.lock().status
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.shared.lock().observers.len()
    }

    /// Retries scheduled since the last successful open.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.shared.lock().attempt
    }

    fn spawn_driver(&self, session: &mut Session) {
        session.generation += 1;
        session.attempt = 0;
        session.status = StreamStatus::Connecting;

        let (tx, rx) = watch::channel(false);
        if let Some(previous) = session.shutdown.replace(tx) {
            previous.send_replace(true);
        }

        let generation = session.generation;
        let shared = Arc::clone(&self.shared);
        info!(url = %self.shared.config.url, generation, "stream connecting");
        session.task = Some(tokio::spawn(drive(shared, generation, rx)));
    }
}

fn teardown(session: &mut Session) {
    session.generation += 1;
    session.observers.clear();
    session.attempt = 0;
    session.status = StreamStatus::Disconnected;
    if let Some(shutdown) = session.shutdown.take() {
        shutdown.send_replace(true);
        info!(generation = session.generation, "stream torn down");
    }
}

// =============================================================================
// SHARED SESSION ACCESS
// =============================================================================

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_open(&self, generation: u64) -> bool {
        let mut session = self.lock();
        if session.generation != generation {
            return false;
        }
        session.status = StreamStatus::Open;
        session.attempt = 0;
        true
    }

    /// Decide what happens after the stream drops. Returns the backoff delay
    /// when another attempt is due, `None` when the driver should stop.
    fn schedule_retry(&self, generation: u64, reason: &str) -> Option<Duration> {
        let (event, delay) = {
            let mut session = self.lock();
            if session.generation != generation || session.observers.is_empty() {
                return None;
            }

            let policy = self.config.reconnect;
            if session.attempt >= policy.max_attempts {
                session.status = StreamStatus::Failed;
                warn!(attempts = session.attempt, reason, "stream reconnect attempts exhausted");
                (SyncEvent::ConnectionFailed { error: Some(reason.to_owned()) }, None)
            } else {
                let delay = policy.delay_for(session.attempt);
                session.attempt += 1;
                session.status = StreamStatus::Reconnecting;
                info!(
                    attempt = session.attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    reason,
                    "stream reconnect scheduled"
                );
                (SyncEvent::ConnectionError { error: Some(reason.to_owned()) }, Some(delay))
            }
        };

        self.fanout(generation, &event);
        delay
    }

    fn deliver(&self, generation: u64, raw: &str) {
        match SyncEvent::decode(raw) {
            Ok(event) => {
                debug!(kind = event.kind(), "stream event");
                self.fanout(generation, &event);
            }
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "dropping malformed stream message");
            }
        }
    }

    fn fanout(&self, generation: u64, event: &SyncEvent) {
        let observers = {
            let session = self.lock();
            if session.generation != generation {
                return;
            }
            session.observers.clone()
        };
        for (id, observer) in &observers {
            notify(*id, observer, event);
        }
    }
}

fn notify(id: ObserverId, observer: &Observer, event: &SyncEvent) {
    if std::panic::catch_unwind(AssertUnwindSafe(|| (observer.as_ref())(event))).is_err() {
        warn!(observer = id.0, kind = event.kind(), "stream observer panicked");
    }
}

// =============================================================================
// DRIVER
// =============================================================================

enum Handshake {
    Open(Box<WsStream>),
    Failed(String),
    Shutdown,
}

enum Ended {
    Dropped(String),
    Shutdown,
}

async fn drive(shared: Arc<Shared>, generation: u64, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }

        let ended = match handshake(&shared.config, &mut shutdown).await {
            Handshake::Open(ws) => {
                if !shared.mark_open(generation) {
                    close_stale(*ws).await;
                    return;
                }
                info!(generation, "stream open");
                shared.fanout(generation, &SyncEvent::ConnectionEstablished);
                run_open(&shared, generation, *ws, &mut shutdown).await
            }
            Handshake::Failed(reason) => Ended::Dropped(reason),
            Handshake::Shutdown => Ended::Shutdown,
        };

        let reason = match ended {
            Ended::Shutdown => return,
            Ended::Dropped(reason) => reason,
        };
        let Some(delay) = shared.schedule_retry(generation, &reason) else {
            return;
        };

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

async fn handshake(config: &StreamConfig, shutdown: &mut watch::Receiver<bool>) -> Handshake {
    let attempt = tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str()));
    tokio::select! {
        result = attempt => match result {
            Ok(Ok((ws, _))) => Handshake::Open(Box::new(ws)),
            Ok(Err(e)) => Handshake::Failed(e.to_string()),
            Err(_) => Handshake::Failed("stream handshake timed out".to_owned()),
        },
        _ = shutdown.changed() => Handshake::Shutdown,
    }
}

async fn run_open(
    shared: &Shared,
    generation: u64,
    ws: WsStream,
    shutdown: &mut watch::Receiver<bool>,
) -> Ended {
    let (mut write, mut read) = ws.split();
    let period = shared.config.heartbeat_period();
    let deadline = shared.config.heartbeat_deadline();
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Any inbound frame, pongs included, proves the peer is alive.
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if let Err(e) = write.send(Message::Close(Some(normal_close()))).await {
                    debug!(error = %e, "close frame not delivered");
                }
                return Ended::Shutdown;
            }
            _ = heartbeat.tick() => {
                let silent_for = last_inbound.elapsed();
                if silent_for >= deadline {
                    let silent_ms = u64::try_from(silent_for.as_millis()).unwrap_or(u64::MAX);
                    warn!(silent_ms, "no frames from server; dropping stream");
                    return Ended::Dropped("heartbeat timeout".to_owned());
                }
                // A failed ping is left to the read half, which reports the close.
                if let Err(e) = write.send(Message::Ping(Default::default())).await {
                    debug!(error = %e, "heartbeat ping failed");
                }
            }
            message = read.next() => {
                if matches!(message, Some(Ok(_))) {
                    last_inbound = Instant::now();
                }
                match message {
                    Some(Ok(Message::Text(text))) => shared.deliver(generation, text.as_str()),
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => shared.deliver(generation, text),
                        Err(e) => warn!(error = %e, "dropping non-utf8 binary message"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map_or_else(
                            || "server closed the stream".to_owned(),
                            |f| format!("server closed the stream ({})", f.code),
                        );
                        return Ended::Dropped(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Ended::Dropped(e.to_string()),
                    None => return Ended::Dropped("stream ended".to_owned()),
                }
            }
        }
    }
}

async fn close_stale(mut ws: WsStream) {
    if let Err(e) = ws.close(Some(normal_close())).await {
        debug!(error = %e, "stale stream close failed");
    }
}

fn normal_close() -> CloseFrame {
    CloseFrame { code: CloseCode::Normal, reason: "client teardown".into() }
}
