//! Call signaling relay.
//!
//! A stateless pass-through: offer, answer, ICE candidate, and reject
//! payloads are forwarded verbatim to the target with the sender attached.
//! The relay never inspects the payload, and an offline target means a
//! silent drop; busy/offline handling is a caller-side timeout concern.

use std::sync::Arc;

use tracing::debug;

use glint_shared::protocol::ServerFrame;
use glint_shared::types::UserId;

use crate::hub::ConnectionHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
    Reject,
}

pub struct SignalingRelay {
    hub: Arc<ConnectionHub>,
}

impl SignalingRelay {
    pub fn new(hub: Arc<ConnectionHub>) -> Self {
        Self { hub }
    }

    /// Forward one signaling payload. Returns whether the target was live.
    pub async fn relay(
        &self,
        from: &UserId,
        to: &UserId,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> bool {
        let frame = match kind {
            SignalKind::Offer => ServerFrame::CallOffer {
                from: from.clone(),
                payload,
            },
            SignalKind::Answer => ServerFrame::CallAnswer {
                from: from.clone(),
                payload,
            },
            SignalKind::IceCandidate => ServerFrame::IceCandidate {
                from: from.clone(),
                payload,
            },
            SignalKind::Reject => ServerFrame::CallReject {
                from: from.clone(),
                payload,
            },
        };

        let delivered = self.hub.send_to(to, frame).await;
        if !delivered {
            debug!(from = %from, to = %to, kind = ?kind, "Signaling target offline, dropped");
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    use crate::hub::ChannelHandle;

    #[tokio::test]
    async fn test_offer_forwarded_with_sender_attached() {
        let hub = Arc::new(ConnectionHub::new());
        let relay = SignalingRelay::new(hub.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(UserId::new("bob"), ChannelHandle::new(tx)).await;

        let payload = serde_json::json!({"sdp": "v=0...", "extra": 1});
        assert!(
            relay
                .relay(
                    &UserId::new("alice"),
                    &UserId::new("bob"),
                    SignalKind::Offer,
                    payload.clone(),
                )
                .await
        );

        match rx.recv().await.unwrap() {
            ServerFrame::CallOffer { from, payload: relayed } => {
                assert_eq!(from, UserId::new("alice"));
                // Verbatim: the relay never touches the payload.
                assert_eq!(relayed, payload);
            }
            other => panic!("expected call-offer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_offline_target_drops_silently() {
        let hub = Arc::new(ConnectionHub::new());
        let relay = SignalingRelay::new(hub);

        assert!(
            !relay
                .relay(
                    &UserId::new("alice"),
                    &UserId::new("ghost"),
                    SignalKind::IceCandidate,
                    serde_json::json!({"candidate": "..."}),
                )
                .await
        );
    }

    #[tokio::test]
    async fn test_reject_maps_to_reject_frame() {
        let hub = Arc::new(ConnectionHub::new());
        let relay = SignalingRelay::new(hub.clone());

        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.register(UserId::new("bob"), ChannelHandle::new(tx)).await;

        relay
            .relay(
                &UserId::new("alice"),
                &UserId::new("bob"),
                SignalKind::Reject,
                serde_json::Value::Null,
            )
            .await;

        assert!(matches!(rx.recv().await.unwrap(), ServerFrame::CallReject { .. }));
    }
}
