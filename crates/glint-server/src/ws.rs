//! WebSocket endpoint: one lightweight task per live channel.
//!
//! The first frame a channel must send is `auth`; until it succeeds no
//! other frame type is processed. A writer task drains the channel's
//! outbound queue so forwarding from other tasks is a non-blocking
//! enqueue. Closing the socket unregisters the hub mapping, keyed by
//! connection id so a stale close never evicts a newer registration.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use glint_shared::protocol::{ClientFrame, ServerFrame};
use glint_shared::types::UserId;

use crate::api::AppState;
use crate::hub::ChannelHandle;
use crate::signaling::SignalKind;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerFrame>();

    // Writer task: the only place that touches the sink, so a slow socket
    // only ever backs up this channel's own queue.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame.to_json() {
                Ok(text) => {
                    if sink.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "Failed to encode outbound frame"),
            }
        }
    });

    let mut session: Option<(UserId, Uuid)> = None;

    while let Some(Ok(ws_message)) = stream.next().await {
        let raw = match ws_message {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            // Ping/pong handled by axum; binary frames are not part of the
            // protocol.
            _ => continue,
        };

        let frame = match ClientFrame::from_json(&raw) {
            Ok(frame) => frame,
            Err(err) => {
                // Malformed frames are dropped without acknowledgment.
                debug!(error = %err, "Dropping malformed frame");
                continue;
            }
        };

        if let ClientFrame::Auth { token } = frame {
            match state.directory.verify_credential(&token).await {
                Some(user_id) => {
                    let handle = ChannelHandle::new(tx.clone());
                    let connection_id = handle.connection_id;
                    state.hub.register(user_id.clone(), handle).await;
                    info!(user = %user_id, "Channel authenticated");
                    let _ = tx.send(ServerFrame::AuthOk {
                        user_id: user_id.clone(),
                    });
                    session = Some((user_id, connection_id));
                }
                None => {
                    // Channel stays open; the client may retry or close.
                    let _ = tx.send(ServerFrame::AuthFail);
                }
            }
            continue;
        }

        let Some((user_id, _)) = &session else {
            debug!("Ignoring frame on unauthenticated channel");
            continue;
        };
        let user_id = user_id.clone();

        dispatch(&state, &user_id, frame).await;
    }

    if let Some((user_id, connection_id)) = session {
        state.hub.unregister(&user_id, connection_id).await;
        info!(user = %user_id, "Channel closed");
    }
    writer.abort();
}

/// Route one authenticated inbound frame. Exhaustive over the protocol: a
/// new client frame kind fails to compile until it is handled here.
async fn dispatch(state: &AppState, from: &UserId, frame: ClientFrame) {
    match frame {
        // Handled in the session loop before dispatch.
        ClientFrame::Auth { .. } => {}

        ClientFrame::Message {
            to_id,
            group_id,
            kind,
            content,
            correlation_id,
        } => {
            state
                .router
                .send(from, to_id, group_id, kind, content, correlation_id)
                .await;
        }

        ClientFrame::Typing { to_id } => state.router.typing(from, &to_id).await,

        ClientFrame::Read { ids, to_id } => state.router.read(from, ids, &to_id).await,

        ClientFrame::DeleteMessage {
            to_id,
            group_id,
            message_id,
            scope,
        } => {
            state
                .router
                .delete(from, to_id, group_id, message_id, scope)
                .await;
        }

        ClientFrame::CallOffer { to_id, payload } => {
            state
                .signaling
                .relay(from, &to_id, SignalKind::Offer, payload)
                .await;
        }
        ClientFrame::CallAnswer { to_id, payload } => {
            state
                .signaling
                .relay(from, &to_id, SignalKind::Answer, payload)
                .await;
        }
        ClientFrame::IceCandidate { to_id, payload } => {
            state
                .signaling
                .relay(from, &to_id, SignalKind::IceCandidate, payload)
                .await;
        }
        ClientFrame::CallReject { to_id, payload } => {
            state
                .signaling
                .relay(from, &to_id, SignalKind::Reject, payload)
                .await;
        }

        ClientFrame::SnapSent { to_id } => state.router.snap(from, &to_id).await,
    }
}
