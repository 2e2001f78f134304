//! Session state machine.
//!
//! One session per WebSocket connection, driven through
//! Opening -> Bound -> Closing -> Closed:
//!
//! - **Opening**: the upgrade query must carry a non-empty `uid`; a
//!   connection without one is closed before it binds.
//! - **Bound**: the session joins presence, receives its membership
//!   snapshot directly (never via the bus), announces itself, then loops
//!   over inbound frames and a heartbeat that keeps its lease alive.
//! - **Closing**: presence removal, `user_left` announcement, and
//!   deregistration all run best-effort; one failing never skips the rest.
//!
//! The session's own `username`/`color` copies feed the next outbound
//! publish; the presence store stays authoritative for what peers see.

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use murmur_bus::Bus as _;
use murmur_core::{codec, Envelope, DEFAULT_CHANNEL};
use murmur_presence::PresenceStore as _;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::handlers::AppState;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::registry::{SessionHandle, SessionId};

/// Upgrade query parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectParams {
    /// User id binding the session. Required, non-empty.
    #[serde(default)]
    pub uid: String,
    /// Initial display name.
    pub username: Option<String>,
    /// Initial CSS color.
    pub color: Option<String>,
}

/// Drive one upgraded socket through its whole lifecycle.
pub async fn run_session(socket: WebSocket, params: ConnectParams, state: Arc<AppState>) {
    if params.uid.is_empty() {
        warn!("rejecting connection without user id");
        let mut socket = socket;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    let (session, out_rx) = Session::bind(params, state);
    session.run(socket, out_rx).await;
}

/// A bound session.
struct Session {
    id: SessionId,
    user_id: String,
    channel_id: String,
    username: Option<String>,
    color: Option<String>,
    out: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    state: Arc<AppState>,
}

impl Session {
    fn bind(params: ConnectParams, state: Arc<AppState>) -> (Self, mpsc::Receiver<Bytes>) {
        let (out, out_rx) = mpsc::channel(state.config.limits.session_send_buffer);

        let session = Self {
            id: SessionId::generate(),
            user_id: params.uid,
            channel_id: DEFAULT_CHANNEL.to_string(),
            username: params.username.filter(|s| !s.is_empty()),
            color: params.color.filter(|s| !s.is_empty()),
            out,
            cancel: state.shutdown.child_token(),
            state,
        };

        (session, out_rx)
    }

    async fn run(mut self, socket: WebSocket, out_rx: mpsc::Receiver<Bytes>) {
        let _metrics_guard = ConnectionMetricsGuard::new();

        // Join the shared presence set.
        if let Err(e) = self
            .state
            .presence
            .add(
                &self.channel_id,
                &self.user_id,
                self.username.as_deref(),
                self.color.as_deref(),
            )
            .await
        {
            error!(session = %self.id, user = %self.user_id, error = %e, "failed to add user to presence");
            metrics::record_error("presence");
        }

        // Queue the membership snapshot for this session alone. It goes
        // into the outbound queue before the session is registered for
        // broadcast, so no bus-fed frame can precede it.
        match self.state.presence.list(&self.channel_id).await {
            Ok(users) => {
                let count = users.len();
                self.queue_direct(&Envelope::user_sync(self.channel_id.as_str(), users))
                    .await;
                debug!(session = %self.id, user = %self.user_id, users = count, "sent user sync");
            }
            Err(e) => {
                error!(session = %self.id, user = %self.user_id, error = %e, "failed to list channel users");
                metrics::record_error("presence");
            }
        }

        self.state.registry.register(
            self.id.clone(),
            SessionHandle::new(
                self.user_id.as_str(),
                self.channel_id.as_str(),
                self.out.clone(),
                self.cancel.clone(),
            ),
        );

        // Announce the join to every instance, this one included.
        self.publish(&Envelope::user_joined(
            self.channel_id.as_str(),
            self.user_id.as_str(),
            self.username.clone(),
            self.color.clone(),
        ))
        .await;

        info!(
            session = %self.id,
            user = %self.user_id,
            channel = %self.channel_id,
            "session connected"
        );

        let (ws_tx, ws_rx) = socket.split();
        let writer = tokio::spawn(write_loop(ws_tx, out_rx, self.cancel.clone()));

        self.read_loop(ws_rx).await;

        // Closing: every step runs even if an earlier one fails.
        if let Err(e) = self
            .state
            .presence
            .remove(&self.channel_id, &self.user_id)
            .await
        {
            error!(session = %self.id, user = %self.user_id, error = %e, "failed to remove user from presence");
            metrics::record_error("presence");
        }

        self.publish(&Envelope::user_left(
            self.channel_id.as_str(),
            self.user_id.as_str(),
        ))
        .await;

        self.state.registry.unregister(&self.id);
        self.cancel.cancel();
        let _ = writer.await;

        info!(session = %self.id, user = %self.user_id, "session disconnected");
    }

    async fn read_loop(&mut self, mut ws_rx: SplitStream<WebSocket>) {
        let mut heartbeat = tokio::time::interval(self.state.config.heartbeat.interval());
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the lease was just written.
        heartbeat.tick().await;
        let mut heartbeat_alive = true;
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!(session = %self.id, "session cancelled");
                    break;
                }
                _ = heartbeat.tick(), if heartbeat_alive => {
                    if let Err(e) = self
                        .state
                        .presence
                        .refresh(&self.channel_id, &self.user_id)
                        .await
                    {
                        // Stop refreshing; lease expiry will reap us if the
                        // store stays unreachable.
                        error!(session = %self.id, user = %self.user_id, error = %e, "presence refresh failed, stopping heartbeat");
                        metrics::record_error("presence");
                        heartbeat_alive = false;
                    } else {
                        debug!(session = %self.id, user = %self.user_id, "refreshed presence");
                    }
                }
                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.handle_frame(text.as_bytes()).await,
                        Some(Ok(Message::Binary(data))) => self.handle_frame(&data).await,
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) => {
                            debug!(session = %self.id, "received close frame");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(session = %self.id, error = %e, "websocket error");
                            metrics::record_error("transport");
                            break;
                        }
                        None => {
                            debug!(session = %self.id, "websocket stream ended");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, data: &[u8]) {
        metrics::record_message(data.len(), "inbound");

        let mut envelope = match codec::decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(session = %self.id, error = %e, "dropping undecodable frame");
                metrics::record_error("decode");
                return;
            }
        };

        // A session may only speak for the user it bound as.
        if envelope.user_id() != self.user_id {
            warn!(
                session = %self.id,
                bound = %self.user_id,
                claimed = %envelope.user_id(),
                "user id mismatch, dropping frame"
            );
            return;
        }

        match &mut envelope {
            Envelope::UsernameChanged(ev) => {
                self.username = ev.username.clone().filter(|s| !s.is_empty());
                // Persist with the current color so a rename never clears it.
                if let Err(e) = self
                    .state
                    .presence
                    .add(
                        &self.channel_id,
                        &self.user_id,
                        self.username.as_deref(),
                        self.color.as_deref(),
                    )
                    .await
                {
                    error!(session = %self.id, user = %self.user_id, error = %e, "failed to persist username change");
                    metrics::record_error("presence");
                }
                info!(session = %self.id, user = %self.user_id, "username changed");
            }
            Envelope::ColorChanged(ev) => {
                self.color = ev.color.clone().filter(|s| !s.is_empty());
                if let Err(e) = self
                    .state
                    .presence
                    .add(
                        &self.channel_id,
                        &self.user_id,
                        self.username.as_deref(),
                        self.color.as_deref(),
                    )
                    .await
                {
                    error!(session = %self.id, user = %self.user_id, error = %e, "failed to persist color change");
                    metrics::record_error("presence");
                }
                info!(session = %self.id, user = %self.user_id, "color changed");
            }
            Envelope::Chat(chat) => {
                // Every chat leaves this instance with a message id.
                if chat.message_id.as_deref().map_or(true, str::is_empty) {
                    chat.message_id = Some(Uuid::new_v4().to_string());
                }
            }
            _ => {}
        }

        self.publish(&envelope).await;
    }

    /// Publish an envelope to the bus. Failures are logged and dropped;
    /// clients may resend at their discretion.
    async fn publish(&self, envelope: &Envelope) {
        let payload = match codec::encode(envelope) {
            Ok(payload) => payload,
            Err(e) => {
                error!(session = %self.id, error = %e, "failed to encode envelope");
                metrics::record_error("encode");
                return;
            }
        };

        metrics::record_message(payload.len(), "publish");

        if let Err(e) = self
            .state
            .bus
            .publish(&self.state.config.bus.topic, payload)
            .await
        {
            error!(
                session = %self.id,
                kind = %envelope.kind(),
                error = %e,
                "bus publish failed"
            );
            metrics::record_error("publish");
        }
    }

    /// Queue an envelope to this session only, bypassing the bus.
    async fn queue_direct(&self, envelope: &Envelope) {
        match codec::encode(envelope) {
            Ok(payload) => {
                let _ = self.out.send(payload).await;
            }
            Err(e) => {
                error!(session = %self.id, error = %e, "failed to encode envelope");
                metrics::record_error("encode");
            }
        }
    }
}

/// Drain the outbound queue into the socket. Stops when the session is
/// cancelled, the queue closes, or a write fails; a failed write cancels
/// the session.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            payload = out_rx.recv() => {
                let Some(payload) = payload else { break };
                // Envelopes are produced by the codec, so they are valid
                // UTF-8; anything else is not ours to forward.
                let Ok(text) = String::from_utf8(payload.to_vec()) else {
                    continue;
                };

                metrics::record_message(text.len(), "outbound");

                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                    debug!(error = %e, "websocket write failed");
                    metrics::record_error("transport");
                    cancel.cancel();
                    break;
                }
            }
        }
    }

    let _ = ws_tx.close().await;
}
