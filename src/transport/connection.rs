//! WebSocket connection to the backend
//!
//! One logical connection at a time. Inbound text frames are forwarded
//! verbatim to the channel handed to [`ConnectionManager::new`]; the router
//! decodes them. Reconnecting is manual.

use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::protocol::OutboundMessage;
use super::{MessageSink, TransportError};

/// Lifecycle of the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Closed => write!(f, "CLOSED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Open => write!(f, "OPEN"),
            ConnectionState::Closing => write!(f, "CLOSING"),
        }
    }
}

/// Owns the socket task and the outbound queue feeding it
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Mutex<Inner>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    inbound_tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct Inner {
    url: Option<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<AbortHandle>,
    /// Bumped per connect so a superseded socket task cannot publish state
    generation: u64,
}

impl ConnectionManager {
    pub fn new(inbound_tx: mpsc::UnboundedSender<String>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            state_tx: Arc::new(state_tx),
            inbound_tx,
        }
    }

    /// Open a connection to `url`, replacing any existing one
    pub fn connect(&self, url: &str) -> Result<(), TransportError> {
        let parsed = url::Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!("{url}: expected ws:// or wss://")));
        }

        let mut inner = self.lock();
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.generation += 1;
        let generation = inner.generation;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        inner.outbound = Some(outbound_tx);
        inner.url = Some(url.to_string());
        self.state_tx.send_replace(ConnectionState::Connecting);
        info!(url, "connecting");

        let manager = self.clone();
        let url = url.to_string();
        let handle = tokio::spawn(async move {
            manager.run(url, generation, outbound_rx).await;
        });
        inner.task = Some(handle.abort_handle());
        Ok(())
    }

    /// Reconnect to the last URL.
    ///
    /// Returns `false` without touching the socket while it is OPEN or
    /// CONNECTING.
    pub fn reconnect(&self) -> Result<bool, TransportError> {
        if matches!(self.state(), ConnectionState::Open | ConnectionState::Connecting) {
            debug!(state = %self.state(), "reconnect ignored");
            return Ok(false);
        }
        let url = self.lock().url.clone().ok_or(TransportError::NoUrl)?;
        self.connect(&url)?;
        Ok(true)
    }

    /// Close the socket gracefully
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        if inner.outbound.take().is_some() && self.state() == ConnectionState::Open {
            self.state_tx.send_replace(ConnectionState::Closing);
        } else if let Some(task) = inner.task.take() {
            task.abort();
            inner.generation += 1;
            self.state_tx.send_replace(ConnectionState::Closed);
        }
    }

    /// Send a raw JSON value, for pass-through requests
    pub fn send_json(&self, value: &serde_json::Value) -> Result<(), TransportError> {
        self.send_text(serde_json::to_string(value)?)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// The URL of the current or last connection
    pub fn url(&self) -> Option<String> {
        self.lock().url.clone()
    }

    /// Abort the socket task
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        inner.outbound = None;
        inner.generation += 1;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        self.state_tx.send_replace(ConnectionState::Closed);
    }

    fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Open {
            warn!(state = %self.state(), "dropping outbound message, socket not open");
            return Err(TransportError::NotConnected);
        }
        let inner = self.lock();
        let outbound = inner.outbound.as_ref().ok_or(TransportError::NotConnected)?;
        debug!(len = text.len(), "sending message");
        outbound.send(text).map_err(|_| TransportError::NotConnected)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Publish `state` if `generation` still owns the socket
    fn publish(&self, generation: u64, state: ConnectionState) {
        let mut inner = self.lock();
        if inner.generation != generation {
            return;
        }
        if state == ConnectionState::Closed {
            inner.outbound = None;
            inner.task = None;
        }
        let old = self.state_tx.send_replace(state);
        if old != state {
            info!(from = %old, to = %state, "connection state");
        }
    }

    async fn run(self, url: String, generation: u64, mut outbound_rx: mpsc::UnboundedReceiver<String>) {
        let (ws_stream, _) = match connect_async(url.as_str()).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(url = %url, error = %e, "websocket connect failed");
                self.publish(generation, ConnectionState::Closed);
                return;
            }
        };
        self.publish(generation, ConnectionState::Open);

        let (mut write, mut read) = ws_stream.split();
        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if self.inbound_tx.send(text).is_err() {
                            debug!("inbound receiver gone");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("connection closed by server");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read failed");
                        break;
                    }
                    _ => {}
                },
                out = outbound_rx.recv() => match out {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            warn!(error = %e, "websocket send failed");
                            break;
                        }
                    }
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }
        self.publish(generation, ConnectionState::Closed);
    }
}

impl MessageSink for ConnectionManager {
    fn send(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.send_text(serde_json::to_string(message)?)
    }

    fn send_raw(&self, message: &serde_json::Value) -> Result<(), TransportError> {
        self.send_json(message)
    }
}
