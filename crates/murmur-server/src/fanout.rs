//! Fan-out engine.
//!
//! A single long-lived consumer over the bus subscription. Every payload
//! is decoded once and dispatched to matching local sessions under the
//! per-type delivery rules in [`murmur_core::filter`]; per-session
//! delivery problems (a full queue, a closing socket) never stop the
//! loop. The loop ends cleanly when its cancellation token fires.

use murmur_core::{codec, filter, Envelope};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handlers::AppState;
use crate::metrics;
use murmur_bus::{Bus as _, BusError};

/// Consume the bus and dispatch to local sessions until cancelled.
///
/// # Errors
///
/// Returns an error if the subscription could not be established or the
/// bus failed mid-stream. Cancellation is a clean `Ok` exit.
pub async fn run(state: Arc<AppState>, cancel: CancellationToken) -> Result<(), BusError> {
    let topic = state.config.bus.topic.clone();
    let mut subscription = state.bus.subscribe(&topic, cancel).await?;

    info!(topic = %topic, "fan-out engine started");

    while let Some(item) = subscription.next().await {
        let payload = match item {
            Ok(payload) => payload,
            Err(e) => return Err(e),
        };

        let envelope = match codec::decode(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping undecodable bus payload");
                metrics::record_error("decode");
                continue;
            }
        };

        if let Envelope::Unknown(unknown) = &envelope {
            debug!(kind = %unknown.kind, "dropping unknown event kind");
            continue;
        }

        let delivered = state.registry.broadcast_filter(payload, |session| {
            filter::should_deliver(&envelope, &session.channel_id, &session.user_id)
        });

        metrics::record_fanout(delivered);
        debug!(
            kind = %envelope.kind(),
            channel = %envelope.channel_id(),
            delivered,
            "dispatched envelope"
        );
    }

    info!(topic = %topic, "fan-out engine stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::{SessionHandle, SessionId, SessionRegistry};
    use bytes::Bytes;
    use murmur_bus::{Bus, MemoryBus};
    use murmur_presence::MemoryPresence;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_util::task::TaskTracker;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            config: Config::default(),
            registry: SessionRegistry::new(),
            bus: Arc::new(MemoryBus::new()),
            presence: Arc::new(MemoryPresence::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    fn attach_session(
        state: &AppState,
        user: &str,
    ) -> (mpsc::Receiver<Bytes>, CancellationToken) {
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        state.registry.register(
            SessionId::generate(),
            SessionHandle::new(user, "default", tx, cancel.clone()),
        );
        (rx, cancel)
    }

    async fn publish(state: &AppState, envelope: &Envelope) {
        let payload = codec::encode(envelope).unwrap();
        state
            .bus
            .publish(&state.config.bus.topic, payload)
            .await
            .unwrap();
    }

    /// Give the spawned engine time to establish its subscription.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_chat_suppressed_to_origin() {
        let state = test_state();
        let cancel = state.shutdown.child_token();
        tokio::spawn(run(state.clone(), cancel));
        settle().await;

        let (mut rx_origin, _c1) = attach_session(&state, "user-1");
        let (mut rx_peer, _c2) = attach_session(&state, "user-2");

        let chat = codec::decode(
            br#"{"type":"chat","channel_id":"default","user_id":"user-1","message_id":"m1","payload":"hi","timestamp":1}"#,
        )
        .unwrap();
        publish(&state, &chat).await;

        let delivered = timeout(Duration::from_secs(1), rx_peer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(codec::decode(&delivered).unwrap(), chat);

        assert!(
            timeout(Duration::from_millis(100), rx_origin.recv())
                .await
                .is_err(),
            "chat echoed back to its origin"
        );
    }

    #[tokio::test]
    async fn test_presence_event_delivered_to_origin() {
        let state = test_state();
        let cancel = state.shutdown.child_token();
        tokio::spawn(run(state.clone(), cancel));
        settle().await;

        let (mut rx_origin, _c1) = attach_session(&state, "user-1");
        let (mut rx_peer, _c2) = attach_session(&state, "user-2");

        let join = Envelope::user_joined("default", "user-1", Some("Alice".into()), None);
        publish(&state, &join).await;

        for rx in [&mut rx_origin, &mut rx_peer] {
            let delivered = timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(codec::decode(&delivered).unwrap(), join);
        }
    }

    #[tokio::test]
    async fn test_unknown_and_undecodable_payloads_skipped() {
        let state = test_state();
        let cancel = state.shutdown.child_token();
        tokio::spawn(run(state.clone(), cancel));
        settle().await;

        let (mut rx, _c) = attach_session(&state, "user-1");

        state
            .bus
            .publish(&state.config.bus.topic, Bytes::from_static(b"not json"))
            .await
            .unwrap();
        state
            .bus
            .publish(
                &state.config.bus.topic,
                Bytes::from_static(
                    br#"{"type":"reaction_added","channel_id":"default","user_id":"user-2","timestamp":1}"#,
                ),
            )
            .await
            .unwrap();
        // The loop must still be alive afterwards.
        publish(&state, &Envelope::user_left("default", "user-2")).await;

        let delivered = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            codec::decode(&delivered).unwrap().kind(),
            "user_left",
            "skipped payloads must not reach sessions"
        );
    }

    #[tokio::test]
    async fn test_cancellation_stops_engine() {
        let state = test_state();
        let cancel = state.shutdown.child_token();
        let handle = tokio::spawn(run(state.clone(), cancel));

        state.shutdown.cancel();

        let result = timeout(Duration::from_secs(1), handle).await.unwrap();
        assert!(result.unwrap().is_ok());
    }
}
