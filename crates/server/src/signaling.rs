use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use serde::Serialize;
use tokio::sync::mpsc;
use tunnel_protocol::{ClientRequest, PeerRole, RegisterReply, ServerEvent};
use uuid::Uuid;

use crate::session::{PeerHandle, RegisterError, SessionDirectory};

pub type SharedDirectory = Arc<SessionDirectory>;

/// Build the signalling router: a single WebSocket endpoint at `/`.
pub fn router(directory: SharedDirectory) -> Router {
    Router::new()
        .route("/", get(ws_upgrade))
        .with_state(directory)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(directory): State<SharedDirectory>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, directory))
}

fn text_frame<T: Serialize>(value: &T) -> Message {
    Message::Text(serde_json::to_string(value).unwrap_or_default().into())
}

/// Per-connection loop. Outgoing messages (replies, replays and frames
/// relayed from the peer's connection) are queued on an outbox so relaying
/// never awaits another connection's socket.
pub async fn handle_connection(mut socket: WebSocket, directory: SharedDirectory) {
    let conn_id = Uuid::new_v4();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
    tracing::debug!(%conn_id, "Peer connected");

    loop {
        tokio::select! {
            Some(queued) = outbox_rx.recv() => {
                if socket.send(queued).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, conn_id, &outbox_tx, &directory).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(%conn_id, "WebSocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some((session, role)) = directory.cleanup(conn_id).await {
        tracing::debug!(%conn_id, %session, %role, "Unregistered on disconnect");
    }
    tracing::debug!(%conn_id, "Peer disconnected");
}

async fn handle_frame(
    text: &str,
    conn_id: Uuid,
    outbox: &mpsc::UnboundedSender<Message>,
    directory: &SessionDirectory,
) {
    let request = match serde_json::from_str::<ClientRequest>(text) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(%conn_id, "Unparseable frame: {e}");
            let _ = outbox.send(Message::Text("Invalid message".into()));
            return;
        }
    };

    match request {
        ClientRequest::Register {
            role: PeerRole::Sender,
            session,
            metadata: Some(metadata),
        } => {
            let handle = PeerHandle::new(conn_id, outbox.clone());
            let reply = match directory.register_sender(&session, metadata, handle).await {
                Ok(()) => RegisterReply::Registered,
                Err(e) => {
                    tracing::info!(%session, "Sender registration failed: {e}");
                    RegisterReply::Error {
                        message: e.to_string(),
                    }
                }
            };
            let _ = outbox.send(text_frame(&reply));
        }
        ClientRequest::Register {
            role: PeerRole::Sender,
            ..
        } => {
            // A sender registration without metadata is malformed
            let _ = outbox.send(Message::Text("Invalid message".into()));
        }
        ClientRequest::Register {
            role: PeerRole::Receiver,
            session,
            ..
        } => {
            let handle = PeerHandle::new(conn_id, outbox.clone());
            match directory.register_receiver(&session, handle).await {
                Ok(welcome) => {
                    let _ = outbox.send(text_frame(&RegisterReply::Registered));
                    let _ = outbox.send(text_frame(&ServerEvent::Metadata {
                        metadata: welcome.metadata,
                    }));
                    if let Some(sdp) = welcome.offer {
                        tracing::debug!(%session, "Replaying stored offer to receiver");
                        let _ = outbox.send(text_frame(&ServerEvent::Offer { sdp }));
                    }
                    for candidate in welcome.candidates {
                        let _ = outbox.send(text_frame(&ServerEvent::Candidate { candidate }));
                    }
                }
                Err(e) => {
                    tracing::info!(%session, "Receiver registration failed: {e}");
                    let close_after = matches!(e, RegisterError::NoSuchSession { .. });
                    let _ = outbox.send(text_frame(&RegisterReply::Error {
                        message: e.to_string(),
                    }));
                    if close_after {
                        let _ = outbox.send(Message::Close(None));
                    }
                }
            }
        }
        ClientRequest::Offer { session, sdp } => {
            if let Some(receiver) = directory.store_offer(&session, &sdp).await {
                tracing::debug!(%session, "Forwarding offer to receiver");
                receiver.send(text_frame(&ServerEvent::Offer { sdp }));
            }
        }
        ClientRequest::Answer { session, sdp } => {
            if let Some(sender) = directory.store_answer(&session, &sdp).await {
                tracing::debug!(%session, "Forwarding answer to sender");
                sender.send(text_frame(&ServerEvent::Answer { sdp }));
            }
        }
        ClientRequest::Candidate {
            session,
            target,
            candidate,
        } => {
            if let Some(peer) = directory
                .store_candidate(&session, target, candidate.clone())
                .await
            {
                tracing::debug!(%session, %target, "Forwarding candidate");
                peer.send(text_frame(&ServerEvent::Candidate { candidate }));
            }
        }
        ClientRequest::Cancel { session } => {
            if let Some(sender) = directory.cancel(&session).await {
                tracing::debug!(%session, "Forwarding cancel to sender");
                sender.send(text_frame(&ServerEvent::Cancel));
            }
        }
    }
}
