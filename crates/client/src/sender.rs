use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tunnel_protocol::{
    ClientRequest, FileMetadata, PeerRole, RegisterReply, ServerEvent, SessionConfig,
};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::payload::Payload;
use crate::util::{human_readable_size, print_progress};
use crate::{peer, session_name, signaling};

/// How the transfer ended. Settled exactly once by whichever terminal event
/// fires first; later events are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Completed,
    Canceled,
    Failed(String),
}

type OutcomeCell = Arc<watch::Sender<Option<Outcome>>>;

fn settle(cell: &watch::Sender<Option<Outcome>>, outcome: Outcome) -> bool {
    cell.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(outcome);
            true
        } else {
            false
        }
    })
}

pub struct Sender {
    config: SessionConfig,
    payload: Payload,
    metadata: FileMetadata,
}

impl Sender {
    pub fn new(paths: Vec<PathBuf>, config: SessionConfig) -> Result<Self> {
        let payload = Payload::prepare(&paths)?;
        let metadata = payload.metadata()?;
        println!(
            "Sending {} ({})",
            metadata.filename,
            human_readable_size(metadata.filesize)
        );
        Ok(Self {
            config,
            payload,
            metadata,
        })
    }

    pub async fn run(self) -> Result<()> {
        let mut ws = signaling::connect(&self.config.server_address).await?;
        let session = self.register(&mut ws).await?;

        let peer_connection = peer::new_peer_connection().await?;
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ClientRequest>();
        peer::forward_local_candidates(
            &peer_connection,
            &session,
            PeerRole::Receiver,
            outbox_tx.clone(),
        );

        let (outcome_tx, mut outcome_rx) = watch::channel(None::<Outcome>);
        let outcome = Arc::new(outcome_tx);
        // Binary semaphore that starts signalled: one chunk may fly before
        // the first ack arrives.
        let ack = Arc::new(Semaphore::new(1));

        let data_channel = peer_connection
            .create_data_channel(peer::DATA_CHANNEL_LABEL, None)
            .await
            .context("Failed to create data channel")?;
        self.wire_data_channel(&data_channel, &outcome, &ack);

        let offer = peer_connection
            .create_offer(None)
            .await
            .context("Failed to create offer")?;
        peer_connection
            .set_local_description(offer)
            .await
            .context("Failed to set local description")?;
        let local_description = peer_connection
            .local_description()
            .await
            .context("Local description missing after offer")?;

        let (mut ws_tx, mut ws_rx) = ws.split();
        signaling::send_request(
            &mut ws_tx,
            &ClientRequest::Offer {
                session: session.clone(),
                sdp: local_description.sdp,
            },
        )
        .await?;

        // The bulk transfer runs on the data channel; this loop only services
        // signalling until a terminal outcome is settled.
        let mut ws_open = true;
        loop {
            tokio::select! {
                _ = outcome_rx.changed() => break,
                Some(request) = outbox_rx.recv(), if ws_open => {
                    if signaling::send_request(&mut ws_tx, &request).await.is_err() {
                        ws_open = false;
                    }
                }
                frame = ws_rx.next(), if ws_open => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) =
                            handle_server_event(&text, &peer_connection, &outcome).await
                        {
                            tracing::warn!("Signalling event failed: {e:#}");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => ws_open = false,
                    Some(Err(e)) => {
                        tracing::debug!("Signalling connection error: {e}");
                        ws_open = false;
                    }
                    _ => {}
                },
            }
        }

        let final_outcome = outcome_rx
            .borrow()
            .clone()
            .unwrap_or_else(|| Outcome::Failed("transfer interrupted".to_string()));

        peer::teardown(&peer_connection).await;
        let _ = ws_tx.close().await;

        match final_outcome {
            Outcome::Completed | Outcome::Canceled => Ok(()),
            Outcome::Failed(message) => bail!("File transfer failed: {message}"),
        }
    }

    /// Register under freshly drawn names until one is free. Only the exact
    /// collision message triggers a retry; any other error is fatal.
    async fn register(&self, ws: &mut signaling::SignalingStream) -> Result<String> {
        println!("Registering session in the coordinating server...");
        loop {
            let session = session_name::generate(session_name::DEFAULT_WORD_COUNT);
            signaling::send_request(
                ws,
                &ClientRequest::Register {
                    role: PeerRole::Sender,
                    session: session.clone(),
                    metadata: Some(self.metadata.clone()),
                },
            )
            .await?;

            let reply = signaling::next_text(ws)
                .await?
                .context("Signalling server closed during registration")?;
            match serde_json::from_str::<RegisterReply>(&reply)
                .context("Unexpected registration reply")?
            {
                RegisterReply::Registered => {
                    println!("Registered successfully, waiting for receiver");
                    println!("Use the following command to receive data:\n");
                    println!("tunnel receive {session}\n");
                    println!("On Windows you may need to use:\n");
                    println!("tunnel.exe receive {session}\n");
                    return Ok(session);
                }
                RegisterReply::Error { message } => {
                    if !is_name_collision(&message, &session) {
                        bail!("Register error: {message}");
                    }
                    tracing::debug!(%session, "Session name collision, retrying");
                }
            }
        }
    }

    fn wire_data_channel(
        &self,
        data_channel: &Arc<RTCDataChannel>,
        outcome: &OutcomeCell,
        ack: &Arc<Semaphore>,
    ) {
        let chunk_size = self.config.chunk_size_bytes;
        let total_chunks = self.config.total_chunks(self.metadata.filesize);
        let path = self.payload.path().to_path_buf();

        // open: start the ack-gated chunk stream
        let dc = Arc::clone(data_channel);
        let open_outcome = Arc::clone(outcome);
        let open_ack = Arc::clone(ack);
        data_channel.on_open(Box::new(move || {
            let dc = Arc::clone(&dc);
            let outcome = Arc::clone(&open_outcome);
            let ack = Arc::clone(&open_ack);
            let path = path.clone();
            Box::pin(async move {
                println!("Receiver connected, sending file...");
                tokio::spawn(async move {
                    if let Err(e) =
                        stream_chunks(&dc, &path, chunk_size, total_chunks, &ack, &outcome).await
                    {
                        tracing::warn!("Chunk stream failed: {e:#}");
                        settle(&outcome, Outcome::Failed(e.to_string()));
                    }
                });
            })
        }));

        let msg_outcome = Arc::clone(outcome);
        let msg_ack = Arc::clone(ack);
        data_channel.on_message(Box::new(move |message: DataChannelMessage| {
            let outcome = Arc::clone(&msg_outcome);
            let ack = Arc::clone(&msg_ack);
            Box::pin(async move {
                if !message.is_string {
                    return;
                }
                let text = String::from_utf8_lossy(&message.data).into_owned();
                match text.as_str() {
                    "ack" => {
                        ack.add_permits(1);
                    }
                    "Finished" => {
                        println!("\nFile transfer successful");
                        settle(&outcome, Outcome::Completed);
                        ack.add_permits(1);
                    }
                    other if other.contains("Error") => {
                        println!("\nFile transfer failed: '{other}'");
                        settle(&outcome, Outcome::Failed(other.to_string()));
                        ack.add_permits(1);
                    }
                    _ => {}
                }
            })
        }));

        // A close before any result frame means the receiver went away
        let close_outcome = Arc::clone(outcome);
        let close_ack = Arc::clone(ack);
        data_channel.on_close(Box::new(move || {
            let outcome = Arc::clone(&close_outcome);
            close_ack.add_permits(1);
            Box::pin(async move {
                if settle(
                    &outcome,
                    Outcome::Failed("data channel closed before completion".to_string()),
                ) {
                    println!("Data channel closed by receiver, closing connection");
                }
            })
        }));
    }
}

async fn handle_server_event(
    text: &str,
    peer_connection: &RTCPeerConnection,
    outcome: &watch::Sender<Option<Outcome>>,
) -> Result<()> {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!("Ignoring unexpected frame: {e}");
            return Ok(());
        }
    };

    match event {
        ServerEvent::Answer { sdp } => {
            let answer =
                RTCSessionDescription::answer(sdp).context("Failed to parse SDP answer")?;
            peer_connection
                .set_remote_description(answer)
                .await
                .context("Failed to set remote description")?;
        }
        ServerEvent::Candidate { candidate } => {
            peer::add_remote_candidate(peer_connection, candidate).await?;
        }
        ServerEvent::Cancel => {
            println!("Transfer canceled by receiver, closing connection");
            settle(outcome, Outcome::Canceled);
        }
        _ => {}
    }
    Ok(())
}

/// Stop-and-wait chunk stream: every send first takes the single ack permit,
/// so at most one chunk is ever in flight.
async fn stream_chunks(
    data_channel: &RTCDataChannel,
    path: &Path,
    chunk_size: u64,
    total_chunks: u64,
    ack: &Semaphore,
    outcome: &watch::Sender<Option<Outcome>>,
) -> Result<()> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut buffer = vec![0u8; chunk_size as usize];
    let mut sent_chunks: u64 = 0;
    let mut sent_bytes: u64 = 0;

    loop {
        print_progress(sent_chunks, total_chunks, sent_bytes);
        let read = read_chunk(&mut file, &mut buffer)?;
        if read == 0 {
            break;
        }

        let permit = ack.acquire().await.context("Ack semaphore closed")?;
        permit.forget();
        // Terminal events release the permit to unblock this wait
        if outcome.borrow().is_some() {
            break;
        }

        data_channel
            .send(&Bytes::copy_from_slice(&buffer[..read]))
            .await
            .context("Failed to send chunk")?;
        sent_chunks += 1;
        sent_bytes += read as u64;
    }

    Ok(())
}

/// Fill as much of `buffer` as the file still holds. A bare `read` may come
/// back short; every frame except the last must carry a full chunk.
fn read_chunk(file: &mut std::fs::File, buffer: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let read = file
            .read(&mut buffer[filled..])
            .context("Failed to read payload")?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

fn is_name_collision(message: &str, session: &str) -> bool {
    message == format!("sender already registered in session {session}")
}
