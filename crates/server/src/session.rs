use std::collections::HashMap;

use axum::extract::ws::Message;
use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tunnel_protocol::{FileMetadata, IceCandidateJson, PeerRole};
use uuid::Uuid;

/// Handle to a connected peer: the connection identity (for cleanup after
/// disconnect) plus the outbox drained by the connection's socket loop.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    conn_id: Uuid,
    outbox: mpsc::UnboundedSender<Message>,
}

impl PeerHandle {
    pub fn new(conn_id: Uuid, outbox: mpsc::UnboundedSender<Message>) -> Self {
        Self { conn_id, outbox }
    }

    /// Queue a message for this peer. Best-effort: a peer that has already
    /// disconnected simply drops the message.
    pub fn send(&self, message: Message) -> bool {
        self.outbox.send(message).is_ok()
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("{role} already registered in session {session}")]
    RoleTaken { role: PeerRole, session: String },
    #[error("Session {session} does not exist")]
    NoSuchSession { session: String },
}

/// Negotiation state stored for replay. The receiver may register after the
/// sender has already produced its offer and candidates; without replay a
/// late joiner would wait forever for messages that were relayed into the
/// void.
#[derive(Debug, Default)]
struct StoredNegotiation {
    offer: Option<String>,
    answer: Option<String>,
    candidates: Vec<(PeerRole, IceCandidateJson)>,
}

#[derive(Debug)]
struct Session {
    sender: Option<PeerHandle>,
    receiver: Option<PeerHandle>,
    metadata: FileMetadata,
    stored: StoredNegotiation,
}

impl Session {
    fn slot(&self, role: PeerRole) -> &Option<PeerHandle> {
        match role {
            PeerRole::Sender => &self.sender,
            PeerRole::Receiver => &self.receiver,
        }
    }

    fn slot_mut(&mut self, role: PeerRole) -> &mut Option<PeerHandle> {
        match role {
            PeerRole::Sender => &mut self.sender,
            PeerRole::Receiver => &mut self.receiver,
        }
    }

    fn is_empty(&self) -> bool {
        self.sender.is_none() && self.receiver.is_none()
    }
}

/// Everything a freshly registered receiver is owed: the file metadata and
/// whatever negotiation state the sender produced before the receiver joined.
#[derive(Debug)]
pub struct ReceiverWelcome {
    pub metadata: FileMetadata,
    pub offer: Option<String>,
    pub candidates: Vec<IceCandidateJson>,
}

/// Directory of active sessions, keyed by session name.
///
/// A session exists iff at least one role slot is bound; it is created by the
/// sender's registration and destroyed when the last bound connection goes
/// away.
#[derive(Debug, Default)]
pub struct SessionDirectory {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionDirectory {
    /// Bind a sender, creating a fresh session record. Fails if the name is
    /// already claimed by another sender — the client treats exactly that
    /// error as a name collision and retries with a new name.
    pub async fn register_sender(
        &self,
        session: &str,
        metadata: FileMetadata,
        handle: PeerHandle,
    ) -> Result<(), RegisterError> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(session)
            && existing.sender.is_some()
        {
            return Err(RegisterError::RoleTaken {
                role: PeerRole::Sender,
                session: session.to_string(),
            });
        }

        sessions.insert(
            session.to_string(),
            Session {
                sender: Some(handle),
                receiver: None,
                metadata,
                stored: StoredNegotiation::default(),
            },
        );
        tracing::info!(%session, "Registered sender");
        Ok(())
    }

    /// Bind a receiver to an existing session and hand back the stored state
    /// it needs to catch up.
    pub async fn register_receiver(
        &self,
        session: &str,
        handle: PeerHandle,
    ) -> Result<ReceiverWelcome, RegisterError> {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .get_mut(session)
            .ok_or_else(|| RegisterError::NoSuchSession {
                session: session.to_string(),
            })?;
        if record.receiver.is_some() {
            return Err(RegisterError::RoleTaken {
                role: PeerRole::Receiver,
                session: session.to_string(),
            });
        }

        record.receiver = Some(handle);
        tracing::info!(%session, "Registered receiver");
        Ok(ReceiverWelcome {
            metadata: record.metadata.clone(),
            offer: record.stored.offer.clone(),
            candidates: record
                .stored
                .candidates
                .iter()
                .filter(|(target, _)| *target == PeerRole::Receiver)
                .map(|(_, candidate)| candidate.clone())
                .collect(),
        })
    }

    /// Store the offer and return the receiver's handle if one is bound.
    pub async fn store_offer(&self, session: &str, sdp: &str) -> Option<PeerHandle> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(session)?;
        record.stored.offer = Some(sdp.to_string());
        record.receiver.clone()
    }

    /// Store the answer and return the sender's handle if one is bound.
    pub async fn store_answer(&self, session: &str, sdp: &str) -> Option<PeerHandle> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(session)?;
        record.stored.answer = Some(sdp.to_string());
        record.sender.clone()
    }

    /// Append a candidate to the stored list (arrival order preserved) and
    /// return the target's handle if that slot is bound.
    pub async fn store_candidate(
        &self,
        session: &str,
        target: PeerRole,
        candidate: IceCandidateJson,
    ) -> Option<PeerHandle> {
        let mut sessions = self.sessions.write().await;
        let record = sessions.get_mut(session)?;
        record.stored.candidates.push((target, candidate));
        record.slot(target).clone()
    }

    /// Return the sender's handle so a cancellation can be forwarded.
    pub async fn cancel(&self, session: &str) -> Option<PeerHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(session)?.sender.clone()
    }

    /// Clear whichever slot the departing connection held and drop the
    /// session record once both slots are empty. Returns what was cleared.
    pub async fn cleanup(&self, conn_id: Uuid) -> Option<(String, PeerRole)> {
        let mut sessions = self.sessions.write().await;

        let mut cleared = None;
        'scan: for (name, record) in sessions.iter_mut() {
            for role in [PeerRole::Sender, PeerRole::Receiver] {
                if record
                    .slot(role)
                    .as_ref()
                    .is_some_and(|handle| handle.conn_id() == conn_id)
                {
                    *record.slot_mut(role) = None;
                    cleared = Some((name.clone(), role));
                    break 'scan;
                }
            }
        }

        if let Some((name, _)) = &cleared
            && sessions.get(name).is_some_and(Session::is_empty)
        {
            sessions.remove(name);
            tracing::debug!(session = %name, "Cleared session");
        }
        cleared
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_handle() -> (PeerHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PeerHandle::new(Uuid::new_v4(), tx), rx)
    }

    fn metadata() -> FileMetadata {
        FileMetadata {
            filename: "data.bin".to_string(),
            filesize: 42,
            checksum: "00".repeat(32),
            should_unzip: false,
        }
    }

    fn candidate(port: u16) -> IceCandidateJson {
        IceCandidateJson {
            component: 1,
            foundation: "1".to_string(),
            ip: "10.0.0.1".to_string(),
            port,
            priority: 100,
            protocol: "udp".to_string(),
            typ: "host".to_string(),
            related_address: None,
            related_port: None,
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
            tcp_type: None,
        }
    }

    #[tokio::test]
    async fn sender_registration_creates_session() {
        let directory = SessionDirectory::default();
        let (handle, _rx) = new_handle();
        directory
            .register_sender("otter-lynx-raven", metadata(), handle)
            .await
            .unwrap();
        assert_eq!(directory.session_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_sender_is_rejected_with_collision_message() {
        let directory = SessionDirectory::default();
        let (first, _rx1) = new_handle();
        let (second, _rx2) = new_handle();
        directory
            .register_sender("otter-lynx-raven", metadata(), first)
            .await
            .unwrap();

        let err = directory
            .register_sender("otter-lynx-raven", metadata(), second)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "sender already registered in session otter-lynx-raven"
        );
        assert_eq!(directory.session_count().await, 1);
    }

    #[tokio::test]
    async fn receiver_needs_existing_session() {
        let directory = SessionDirectory::default();
        let (handle, _rx) = new_handle();
        let err = directory
            .register_receiver("ghost-bat-ibex", handle)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Session ghost-bat-ibex does not exist");
        assert_eq!(directory.session_count().await, 0);
    }

    #[tokio::test]
    async fn duplicate_receiver_is_rejected() {
        let directory = SessionDirectory::default();
        let (sender, _srx) = new_handle();
        let (first, _rx1) = new_handle();
        let (second, _rx2) = new_handle();
        directory
            .register_sender("otter-lynx-raven", metadata(), sender)
            .await
            .unwrap();
        directory
            .register_receiver("otter-lynx-raven", first)
            .await
            .unwrap();

        let err = directory
            .register_receiver("otter-lynx-raven", second)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "receiver already registered in session otter-lynx-raven"
        );
    }

    #[tokio::test]
    async fn welcome_replays_offer_and_receiver_candidates_in_order() {
        let directory = SessionDirectory::default();
        let (sender, _srx) = new_handle();
        directory
            .register_sender("otter-lynx-raven", metadata(), sender)
            .await
            .unwrap();

        // Sender negotiates before the receiver shows up
        assert!(directory.store_offer("otter-lynx-raven", "v=0 offer").await.is_none());
        let _ = directory
            .store_candidate("otter-lynx-raven", PeerRole::Receiver, candidate(1000))
            .await;
        let _ = directory
            .store_candidate("otter-lynx-raven", PeerRole::Sender, candidate(2000))
            .await;
        let _ = directory
            .store_candidate("otter-lynx-raven", PeerRole::Receiver, candidate(3000))
            .await;

        let (receiver, _rrx) = new_handle();
        let welcome = directory
            .register_receiver("otter-lynx-raven", receiver)
            .await
            .unwrap();
        assert_eq!(welcome.metadata, metadata());
        assert_eq!(welcome.offer.as_deref(), Some("v=0 offer"));
        let ports: Vec<u16> = welcome.candidates.iter().map(|c| c.port).collect();
        assert_eq!(ports, vec![1000, 3000]);
    }

    #[tokio::test]
    async fn relay_targets_resolve_to_bound_slots() {
        let directory = SessionDirectory::default();
        let (sender, _srx) = new_handle();
        let sender_id = sender.conn_id();
        directory
            .register_sender("otter-lynx-raven", metadata(), sender)
            .await
            .unwrap();

        // No receiver yet: offer and receiver-targeted candidates are stored only
        assert!(directory.store_offer("otter-lynx-raven", "sdp").await.is_none());
        assert!(
            directory
                .store_candidate("otter-lynx-raven", PeerRole::Receiver, candidate(1))
                .await
                .is_none()
        );

        let (receiver, _rrx) = new_handle();
        let receiver_id = receiver.conn_id();
        directory
            .register_receiver("otter-lynx-raven", receiver)
            .await
            .unwrap();

        let to_receiver = directory
            .store_candidate("otter-lynx-raven", PeerRole::Receiver, candidate(2))
            .await
            .unwrap();
        assert_eq!(to_receiver.conn_id(), receiver_id);

        let to_sender = directory
            .store_answer("otter-lynx-raven", "sdp answer")
            .await
            .unwrap();
        assert_eq!(to_sender.conn_id(), sender_id);

        let canceled = directory.cancel("otter-lynx-raven").await.unwrap();
        assert_eq!(canceled.conn_id(), sender_id);
    }

    #[tokio::test]
    async fn cancel_without_session_is_none() {
        let directory = SessionDirectory::default();
        assert!(directory.cancel("ghost-bat-ibex").await.is_none());
    }

    #[tokio::test]
    async fn cleanup_clears_slots_and_drops_empty_sessions() {
        let directory = SessionDirectory::default();
        let (sender, _srx) = new_handle();
        let (receiver, _rrx) = new_handle();
        let sender_id = sender.conn_id();
        let receiver_id = receiver.conn_id();

        directory
            .register_sender("otter-lynx-raven", metadata(), sender)
            .await
            .unwrap();
        directory
            .register_receiver("otter-lynx-raven", receiver)
            .await
            .unwrap();

        let cleared = directory.cleanup(sender_id).await;
        assert_eq!(
            cleared,
            Some(("otter-lynx-raven".to_string(), PeerRole::Sender))
        );
        // Receiver still bound, session survives
        assert_eq!(directory.session_count().await, 1);

        let cleared = directory.cleanup(receiver_id).await;
        assert_eq!(
            cleared,
            Some(("otter-lynx-raven".to_string(), PeerRole::Receiver))
        );
        assert_eq!(directory.session_count().await, 0);
    }

    #[tokio::test]
    async fn cleanup_of_unknown_connection_is_noop() {
        let directory = SessionDirectory::default();
        let (sender, _srx) = new_handle();
        directory
            .register_sender("otter-lynx-raven", metadata(), sender)
            .await
            .unwrap();
        assert!(directory.cleanup(Uuid::new_v4()).await.is_none());
        assert_eq!(directory.session_count().await, 1);
    }

    #[tokio::test]
    async fn name_is_reusable_after_cleanup() {
        let directory = SessionDirectory::default();
        let (first, _rx1) = new_handle();
        let first_id = first.conn_id();
        directory
            .register_sender("otter-lynx-raven", metadata(), first)
            .await
            .unwrap();
        directory.cleanup(first_id).await;

        let (second, _rx2) = new_handle();
        directory
            .register_sender("otter-lynx-raven", metadata(), second)
            .await
            .unwrap();
        assert_eq!(directory.session_count().await, 1);
    }
}
