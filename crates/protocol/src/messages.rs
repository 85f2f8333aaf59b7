use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ice::IceCandidateJson;

/// The two roles a connection can hold in a session. Also used as the
/// target of a relayed ICE candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Sender,
    Receiver,
}

impl fmt::Display for PeerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerRole::Sender => f.write_str("sender"),
            PeerRole::Receiver => f.write_str("receiver"),
        }
    }
}

/// Descriptor of the payload, created once by the sender before registration
/// and relayed verbatim to the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Basename of the payload file
    pub filename: String,
    /// Payload length in bytes
    pub filesize: u64,
    /// Lowercase hex SHA-256 digest of the payload
    pub checksum: String,
    /// Whether the receiver should unpack the payload as a zip archive
    pub should_unzip: bool,
}

/// Messages a peer sends to the signalling server.
///
/// Internally tagged on `action`, so an unknown action is simply a failed
/// parse — the server answers those with the literal text `Invalid message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientRequest {
    Register {
        role: PeerRole,
        session: String,
        /// Present only when registering as sender
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<FileMetadata>,
    },
    Offer {
        session: String,
        sdp: String,
    },
    Answer {
        session: String,
        sdp: String,
    },
    Candidate {
        session: String,
        target: PeerRole,
        candidate: IceCandidateJson,
    },
    Cancel {
        session: String,
    },
}

/// The server's direct reply to a `register` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RegisterReply {
    Registered,
    Error { message: String },
}

/// Messages the server pushes to a peer: relayed negotiation state plus the
/// metadata delivered right after receiver registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ServerEvent {
    Metadata { metadata: FileMetadata },
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidateJson },
    Cancel,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> FileMetadata {
        FileMetadata {
            filename: "report.pdf".to_string(),
            filesize: 123_456,
            checksum: "ab".repeat(32),
            should_unzip: false,
        }
    }

    #[test]
    fn register_sender_wire_shape() {
        let req = ClientRequest::Register {
            role: PeerRole::Sender,
            session: "otter-lynx-raven".to_string(),
            metadata: Some(sample_metadata()),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""action":"register""#));
        assert!(json.contains(r#""role":"sender""#));
        assert!(json.contains(r#""session":"otter-lynx-raven""#));
        assert!(json.contains(r#""filename":"report.pdf""#));
        assert!(json.contains(r#""filesize":123456"#));
        assert!(json.contains(r#""should_unzip":false"#));
    }

    #[test]
    fn register_receiver_omits_metadata() {
        let req = ClientRequest::Register {
            role: PeerRole::Receiver,
            session: "otter-lynx-raven".to_string(),
            metadata: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""role":"receiver""#));
        assert!(!json.contains("metadata"));

        let parsed: ClientRequest = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientRequest::Register { role, metadata, .. } => {
                assert_eq!(role, PeerRole::Receiver);
                assert!(metadata.is_none());
            }
            _ => panic!("Expected Register"),
        }
    }

    #[test]
    fn unknown_action_fails_to_parse() {
        let raw = r#"{"action":"teleport","session":"otter-lynx-raven"}"#;
        assert!(serde_json::from_str::<ClientRequest>(raw).is_err());
    }

    #[test]
    fn missing_action_fails_to_parse() {
        assert!(serde_json::from_str::<ClientRequest>(r#"{"session":"x"}"#).is_err());
    }

    #[test]
    fn register_reply_shapes() {
        let ok = serde_json::to_string(&RegisterReply::Registered).unwrap();
        assert_eq!(ok, r#"{"status":"registered"}"#);

        let err = serde_json::to_string(&RegisterReply::Error {
            message: "sender already registered in session otter-lynx-raven".to_string(),
        })
        .unwrap();
        assert!(err.contains(r#""status":"error""#));
        assert!(err.contains("already registered"));

        let parsed: RegisterReply = serde_json::from_str(&err).unwrap();
        assert!(matches!(parsed, RegisterReply::Error { .. }));
    }

    #[test]
    fn cancel_event_is_bare_action() {
        let json = serde_json::to_string(&ServerEvent::Cancel).unwrap();
        assert_eq!(json, r#"{"action":"cancel"}"#);
        let parsed: ServerEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, ServerEvent::Cancel));
    }

    #[test]
    fn metadata_event_roundtrip() {
        let event = ServerEvent::Metadata {
            metadata: sample_metadata(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""action":"metadata""#));
        let parsed: ServerEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            ServerEvent::Metadata { metadata } => assert_eq!(metadata, sample_metadata()),
            _ => panic!("Expected Metadata"),
        }
    }

    #[test]
    fn offer_and_answer_carry_sdp() {
        let offer = serde_json::to_string(&ClientRequest::Offer {
            session: "s".to_string(),
            sdp: "v=0\r\n".to_string(),
        })
        .unwrap();
        assert!(offer.contains(r#""action":"offer""#));

        let answer: ServerEvent = serde_json::from_str(r#"{"action":"answer","sdp":"v=0"}"#).unwrap();
        match answer {
            ServerEvent::Answer { sdp } => assert_eq!(sdp, "v=0"),
            _ => panic!("Expected Answer"),
        }
    }

    #[test]
    fn peer_role_display_matches_wire() {
        assert_eq!(PeerRole::Sender.to_string(), "sender");
        assert_eq!(PeerRole::Receiver.to_string(), "receiver");
        assert_eq!(serde_json::to_string(&PeerRole::Sender).unwrap(), r#""sender""#);
    }
}
