//! Real-time update channel.
//!
//! One WebSocket connection per terminal process, owned by an
//! [`UpdateChannel`] that is built once and shared by reference. Inbound text
//! frames are parsed as JSON and handed to every registered listener, in
//! registration order. Listeners treat a message as a cue to re-fetch; the
//! payload shape is not interpreted here.
//!
//! The connection is re-established after a fixed delay (2 s by default)
//! whenever it closes or fails, for as long as the channel is running.

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::TerminalConfig;
use crate::error::ParseError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Callback invoked with each decoded update message.
pub type UpdateListener = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(u64, UpdateListener)>,
}

struct Shared {
    url: String,
    reconnect_delay: Duration,
    registry: Mutex<Registry>,
    connected: AtomicBool,
    attempts: AtomicU64,
    messages: AtomicU64,
    shutdown: CancellationToken,
}

impl Shared {
    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decode one text frame and fan it out. Malformed payloads are logged
    /// and dropped; the connection is unaffected.
    fn dispatch(&self, text: &str) {
        let payload: Value = match serde_json::from_str(text).map_err(ParseError::from) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, len = text.len(), "Dropping update message");
                return;
            }
        };
        self.messages.fetch_add(1, Ordering::Relaxed);

        // Snapshot so listeners may (un)subscribe while being called.
        let listeners: Vec<UpdateListener> = self
            .registry()
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        debug!(listeners = listeners.len(), "Dispatching update");

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&payload))).is_err() {
                error!("Update listener panicked");
            }
        }
    }
}

/// Handle returned by [`UpdateChannel::on_update`].
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Remove the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.registry().listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

pub struct UpdateChannel {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateChannel {
    pub fn new(config: &TerminalConfig) -> Self {
        Self::with_url(config.ws_url(), config.reconnect_delay)
    }

    pub fn with_url(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                reconnect_delay,
                registry: Mutex::new(Registry::default()),
                connected: AtomicBool::new(false),
                attempts: AtomicU64::new(0),
                messages: AtomicU64::new(0),
                shutdown: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Start the connection task. Calling again while it runs does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Update channel already running");
            return;
        }
        if self.shared.shutdown.is_cancelled() {
            warn!("Update channel was shut down, not reconnecting");
            return;
        }
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(run(shared)));
    }

    /// Register a listener for every subsequent message.
    pub fn on_update<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let mut registry = self.shared.registry();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.listeners.push((id, Arc::new(listener)));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.shared.registry().listeners.len()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Connection attempts made so far, successful or not.
    pub fn connection_attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Messages delivered to listeners so far.
    pub fn messages_received(&self) -> u64 {
        self.shared.messages.load(Ordering::Relaxed)
    }

    /// Stop reconnecting, close the socket and wait for the task to end.
    pub async fn shutdown(&self) {
        self.shared.shutdown.cancel();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Update channel task failed: {e}");
            }
        }
        info!("Update channel stopped");
    }
}

async fn run(shared: Arc<Shared>) {
    info!(url = %shared.url, "Update channel started");

    loop {
        if shared.shutdown.is_cancelled() {
            break;
        }

        let attempt = shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let connected = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            res = connect_async(shared.url.as_str()) => res,
        };

        match connected {
            Ok((ws, _response)) => {
                info!(attempt, "Update channel connected");
                shared.connected.store(true, Ordering::SeqCst);
                run_session(&shared, ws).await;
                shared.connected.store(false, Ordering::SeqCst);
            }
            Err(e) => {
                warn!(
                    attempt,
                    delay_ms = shared.reconnect_delay.as_millis() as u64,
                    "Update channel connect failed: {e}"
                );
            }
        }

        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = tokio::time::sleep(shared.reconnect_delay) => {},
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    info!("Update channel loop exited");
}

/// Read frames until the socket closes, errors, or shutdown is requested.
async fn run_session(shared: &Shared, mut ws: WsStream) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                let _ = ws.close(None).await;
                return;
            }
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => shared.dispatch(text.as_str()),
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => shared.dispatch(text),
                    Err(_) => warn!(len = bytes.len(), "Dropping non-UTF-8 update message"),
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Update channel closed by server");
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Update channel error: {e}");
                    return;
                }
                None => {
                    info!("Update channel stream ended");
                    return;
                }
            }
        }
    }
}
