use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tunnel_protocol::{ClientRequest, IceCandidateJson, PeerRole};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

/// Label both peers use for the transfer channel.
pub const DATA_CHANNEL_LABEL: &str = "filetransfer";

pub async fn new_peer_connection() -> Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .context("Failed to register codecs")?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)
        .context("Failed to register interceptors")?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            ..Default::default()
        }],
        ..Default::default()
    };

    let peer_connection = Arc::new(
        api.new_peer_connection(config)
            .await
            .context("Failed to create peer connection")?,
    );

    peer_connection.on_peer_connection_state_change(Box::new(move |state| {
        match state {
            RTCPeerConnectionState::Failed => tracing::warn!("Peer connection failed"),
            _ => tracing::debug!(?state, "Peer connection state changed"),
        }
        Box::pin(async {})
    }));

    Ok(peer_connection)
}

/// Forward every non-null local ICE candidate into the signalling outbox,
/// addressed at the remote role.
pub fn forward_local_candidates(
    peer_connection: &RTCPeerConnection,
    session: &str,
    target: PeerRole,
    outbox: mpsc::UnboundedSender<ClientRequest>,
) {
    let session = session.to_string();
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let outbox = outbox.clone();
        let session = session.clone();
        Box::pin(async move {
            if let Some(candidate) = candidate {
                let request = ClientRequest::Candidate {
                    session,
                    target,
                    candidate: candidate_to_json(&candidate),
                };
                if outbox.send(request).is_err() {
                    tracing::debug!("Signalling outbox closed, dropping local candidate");
                }
            }
        })
    }));
}

/// Flatten a gathered candidate into the wire representation.
pub fn candidate_to_json(candidate: &RTCIceCandidate) -> IceCandidateJson {
    IceCandidateJson {
        component: candidate.component,
        foundation: candidate.foundation.clone(),
        ip: candidate.address.clone(),
        port: candidate.port,
        priority: candidate.priority,
        protocol: candidate.protocol.to_string(),
        typ: candidate.typ.to_string(),
        related_address: (!candidate.related_address.is_empty())
            .then(|| candidate.related_address.clone()),
        related_port: (candidate.related_port != 0).then_some(candidate.related_port),
        // Single m-line: the data channel
        sdp_mid: Some("0".to_string()),
        sdp_m_line_index: Some(0),
        tcp_type: (!candidate.tcp_type.is_empty() && candidate.tcp_type != "unspecified")
            .then(|| candidate.tcp_type.clone()),
    }
}

pub async fn add_remote_candidate(
    peer_connection: &RTCPeerConnection,
    candidate: IceCandidateJson,
) -> Result<()> {
    let init = RTCIceCandidateInit {
        candidate: candidate.to_attribute(),
        sdp_mid: candidate.sdp_mid.clone(),
        sdp_mline_index: candidate.sdp_m_line_index,
        ..Default::default()
    };
    peer_connection
        .add_ice_candidate(init)
        .await
        .context("Failed to add ICE candidate")
}

/// Stop all transceivers before closing so ICE tears down gracefully.
pub async fn teardown(peer_connection: &RTCPeerConnection) {
    for transceiver in peer_connection.get_transceivers().await {
        if let Err(e) = transceiver.stop().await {
            tracing::debug!("Transceiver stop failed: {e}");
        }
    }
    if let Err(e) = peer_connection.close().await {
        tracing::warn!("Failed to close peer connection: {e}");
    }
}
