use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tunnel_protocol::{
    ClientRequest, FileMetadata, PeerRole, RegisterReply, ServerEvent, SessionConfig,
};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::util::{human_readable_size, print_progress};
use crate::{archive, checksum, peer, signaling};

pub struct Receiver {
    session: String,
    max_ram_mb: u64,
    config: SessionConfig,
}

/// Everything the reassembly task needs to know up front.
struct Assembly {
    metadata: FileMetadata,
    total_chunks: u64,
    chunks_per_part: u64,
    unpack_dir: String,
}

impl Receiver {
    pub fn new(session: String, max_ram_mb: u64, config: SessionConfig) -> Self {
        Self {
            session,
            max_ram_mb,
            config,
        }
    }

    pub async fn run(self) -> Result<()> {
        let mut ws = signaling::connect(&self.config.server_address).await?;

        println!("Registering receiver in the coordinating server...");
        signaling::send_request(
            &mut ws,
            &ClientRequest::Register {
                role: PeerRole::Receiver,
                session: self.session.clone(),
                metadata: None,
            },
        )
        .await?;
        let reply = signaling::next_text(&mut ws)
            .await?
            .context("Signalling server closed during registration")?;
        match serde_json::from_str::<RegisterReply>(&reply)
            .context("Unexpected registration reply")?
        {
            RegisterReply::Registered => {
                println!("Receiver registered successfully, connecting to the sender...");
            }
            RegisterReply::Error { message } => bail!("Register error: {message}"),
        }

        // Metadata arrives right after registration. Negotiation frames that
        // race ahead of it are buffered and handled once the peer exists.
        let mut pending: Vec<ServerEvent> = Vec::new();
        let metadata = loop {
            let text = signaling::next_text(&mut ws)
                .await?
                .context("Signalling server closed before sending metadata")?;
            match serde_json::from_str::<ServerEvent>(&text) {
                Ok(ServerEvent::Metadata { metadata }) => break metadata,
                Ok(event) => pending.push(event),
                Err(e) => tracing::debug!("Ignoring unexpected frame: {e}"),
            }
        };

        if !confirm_transfer(&metadata, &self.session)? {
            signaling::send_request(
                &mut ws,
                &ClientRequest::Cancel {
                    session: self.session.clone(),
                },
            )
            .await?;
            let _ = ws.close(None).await;
            println!("User declined the file transfer.");
            return Ok(());
        }

        let assembly = Assembly {
            total_chunks: self.config.total_chunks(metadata.filesize),
            chunks_per_part: self.config.chunks_per_part(self.max_ram_mb),
            unpack_dir: self.session.clone(),
            metadata,
        };

        let peer_connection = peer::new_peer_connection().await?;
        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ClientRequest>();
        peer::forward_local_candidates(
            &peer_connection,
            &self.session,
            PeerRole::Sender,
            outbox_tx.clone(),
        );

        let (dc_tx, dc_rx) = mpsc::channel::<Arc<RTCDataChannel>>(1);
        let (chunk_tx, chunk_rx) = mpsc::channel::<Bytes>(4);
        let (opened_tx, opened_rx) = watch::channel(false);
        let (closed_tx, closed_rx) = watch::channel(false);
        wire_data_channel(&peer_connection, dc_tx, chunk_tx, opened_tx, closed_tx);

        let mut reassembly =
            tokio::spawn(run_reassembly(dc_rx, chunk_rx, opened_rx, closed_rx, assembly));

        let (mut ws_tx, mut ws_rx) = ws.split();
        for event in pending {
            if let Err(e) =
                handle_server_event(event, &peer_connection, &self.session, &outbox_tx).await
            {
                tracing::warn!("Signalling event failed: {e:#}");
            }
        }

        let mut ws_open = true;
        let transfer = loop {
            tokio::select! {
                joined = &mut reassembly => {
                    break joined.context("Reassembly task panicked")?;
                }
                Some(request) = outbox_rx.recv(), if ws_open => {
                    if signaling::send_request(&mut ws_tx, &request).await.is_err() {
                        ws_open = false;
                    }
                }
                frame = ws_rx.next(), if ws_open => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if let Err(e) = handle_server_event(
                                    event,
                                    &peer_connection,
                                    &self.session,
                                    &outbox_tx,
                                )
                                .await
                                {
                                    tracing::warn!("Signalling event failed: {e:#}");
                                }
                            }
                            Err(e) => tracing::debug!("Ignoring unexpected frame: {e}"),
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
        };

        peer::teardown(&peer_connection).await;
        let _ = ws_tx.close().await;
        transfer
    }
}

async fn handle_server_event(
    event: ServerEvent,
    peer_connection: &RTCPeerConnection,
    session: &str,
    outbox: &mpsc::UnboundedSender<ClientRequest>,
) -> Result<()> {
    match event {
        ServerEvent::Offer { sdp } => {
            let offer = RTCSessionDescription::offer(sdp).context("Failed to parse SDP offer")?;
            peer_connection
                .set_remote_description(offer)
                .await
                .context("Failed to set remote description")?;
            let answer = peer_connection
                .create_answer(None)
                .await
                .context("Failed to create answer")?;
            peer_connection
                .set_local_description(answer)
                .await
                .context("Failed to set local description")?;
            let local_description = peer_connection
                .local_description()
                .await
                .context("Local description missing after answer")?;
            let _ = outbox.send(ClientRequest::Answer {
                session: session.to_string(),
                sdp: local_description.sdp,
            });
        }
        ServerEvent::Candidate { candidate } => {
            peer::add_remote_candidate(peer_connection, candidate).await?;
        }
        _ => {}
    }
    Ok(())
}

fn wire_data_channel(
    peer_connection: &RTCPeerConnection,
    dc_tx: mpsc::Sender<Arc<RTCDataChannel>>,
    chunk_tx: mpsc::Sender<Bytes>,
    opened_tx: watch::Sender<bool>,
    closed_tx: watch::Sender<bool>,
) {
    let opened_tx = Arc::new(opened_tx);
    let closed_tx = Arc::new(closed_tx);
    peer_connection.on_data_channel(Box::new(move |data_channel: Arc<RTCDataChannel>| {
        let dc_tx = dc_tx.clone();
        let chunk_tx = chunk_tx.clone();
        let opened_tx = Arc::clone(&opened_tx);
        let closed_tx = Arc::clone(&closed_tx);
        Box::pin(async move {
            if data_channel.label() != peer::DATA_CHANNEL_LABEL {
                tracing::warn!(label = data_channel.label(), "Ignoring unexpected data channel");
                return;
            }

            data_channel.on_open(Box::new(move || {
                let _ = opened_tx.send(true);
                Box::pin(async {})
            }));

            data_channel.on_message(Box::new(move |message: DataChannelMessage| {
                let chunk_tx = chunk_tx.clone();
                Box::pin(async move {
                    if message.is_string {
                        return;
                    }
                    // Bounded channel: the channel's read loop waits while a
                    // part file is still being written, so the in-memory
                    // buffer stays within its budget.
                    if chunk_tx.send(message.data).await.is_err() {
                        tracing::debug!("Reassembly task gone, dropping chunk");
                    }
                })
            }));

            data_channel.on_close(Box::new(move || {
                let _ = closed_tx.send(true);
                Box::pin(async {})
            }));

            if dc_tx.send(data_channel).await.is_err() {
                tracing::debug!("Reassembly task gone before the data channel arrived");
            }
        })
    }));
}

/// Consume the chunk stream into bounded part files, merge them, verify the
/// digest and report the result over the data channel.
async fn run_reassembly(
    mut dc_rx: mpsc::Receiver<Arc<RTCDataChannel>>,
    mut chunk_rx: mpsc::Receiver<Bytes>,
    mut opened_rx: watch::Receiver<bool>,
    mut closed_rx: watch::Receiver<bool>,
    assembly: Assembly,
) -> Result<()> {
    let data_channel = dc_rx
        .recv()
        .await
        .context("Peer connection closed before the data channel arrived")?;

    tokio::select! {
        changed = opened_rx.wait_for(|open| *open) => {
            changed.context("Data channel handlers dropped")?;
        }
        _ = closed_rx.wait_for(|closed| *closed) => {
            bail!("Data channel closed before the transfer started");
        }
    }

    let destination = PathBuf::from(&assembly.metadata.filename);
    let mut buffered: Vec<Bytes> = Vec::new();
    let mut parts: Vec<PathBuf> = Vec::new();
    let mut received_chunks: u64 = 0;
    let mut received_bytes: u64 = 0;

    while received_chunks < assembly.total_chunks {
        let chunk = tokio::select! {
            biased;
            maybe = chunk_rx.recv() => {
                maybe.context("Data channel gone before the transfer completed")?
            }
            _ = closed_rx.wait_for(|closed| *closed) => {
                bail!("Data channel closed before the transfer completed");
            }
        };

        received_chunks += 1;
        received_bytes += chunk.len() as u64;
        buffered.push(chunk);
        print_progress(received_chunks, assembly.total_chunks, received_bytes);

        if buffered.len() as u64 == assembly.chunks_per_part
            || received_chunks == assembly.total_chunks
        {
            let part = part_path(&destination, parts.len());
            write_part(&part, &buffered).await?;
            parts.push(part);
            buffered.clear();
        }

        // One ack per chunk, flush or not: the sender's window is exactly one
        data_channel
            .send_text("ack".to_string())
            .await
            .context("Failed to send ack")?;
    }

    println!("\nAll data received, finalizing...");
    merge_parts(&destination, &parts).await?;

    let digest = {
        let destination = destination.clone();
        tokio::task::spawn_blocking(move || checksum::file_sha256(&destination))
            .await
            .context("Checksum task panicked")??
    };

    if digest != assembly.metadata.checksum {
        println!("File transfer failed: checksum mismatch");
        let _ = data_channel
            .send_text("Error: checksum mismatch".to_string())
            .await;
        // The assembled file stays on disk for inspection
        bail!("checksum mismatch");
    }

    println!("File transfer finished.");
    data_channel
        .send_text("Finished".to_string())
        .await
        .context("Failed to send completion")?;

    if assembly.metadata.should_unzip {
        let archive_path = destination.clone();
        let unpack_dir = PathBuf::from(&assembly.unpack_dir);
        tokio::task::spawn_blocking(move || archive::decompress(&archive_path, &unpack_dir, true))
            .await
            .context("Unpack task panicked")??;
    }

    Ok(())
}

fn part_path(destination: &Path, index: usize) -> PathBuf {
    PathBuf::from(format!("{}.part{index}", destination.display()))
}

async fn write_part(path: &Path, chunks: &[Bytes]) -> Result<()> {
    let mut file = fs::File::create(path)
        .await
        .with_context(|| format!("Failed to create part file {}", path.display()))?;
    for chunk in chunks {
        file.write_all(chunk)
            .await
            .with_context(|| format!("Failed to write part file {}", path.display()))?;
    }
    file.flush().await.context("Failed to flush part file")?;
    Ok(())
}

/// A single part becomes the destination by rename; multiple parts are
/// appended in order and deleted as they are consumed.
async fn merge_parts(destination: &Path, parts: &[PathBuf]) -> Result<()> {
    if let [single] = parts {
        if fs::try_exists(destination).await.unwrap_or(false) {
            fs::remove_file(destination)
                .await
                .with_context(|| format!("Failed to replace {}", destination.display()))?;
        }
        fs::rename(single, destination)
            .await
            .with_context(|| format!("Failed to move part to {}", destination.display()))?;
        return Ok(());
    }

    let mut output = fs::File::create(destination)
        .await
        .with_context(|| format!("Failed to create {}", destination.display()))?;
    for part in parts {
        let mut input = fs::File::open(part)
            .await
            .with_context(|| format!("Failed to open part {}", part.display()))?;
        tokio::io::copy(&mut input, &mut output)
            .await
            .context("Failed to append part")?;
        fs::remove_file(part)
            .await
            .with_context(|| format!("Failed to delete part {}", part.display()))?;
    }
    output.flush().await.context("Failed to flush destination")?;
    Ok(())
}

fn confirm_transfer(metadata: &FileMetadata, session: &str) -> Result<bool> {
    let unzip_note = if metadata.should_unzip {
        format!(", archive will be unpacked into directory: {session}")
    } else {
        String::new()
    };
    let overwrite_note = if Path::new(&metadata.filename).exists() {
        " (will overwrite an existing file in the current working directory)"
    } else {
        ""
    };
    print!(
        "Incoming file: {} ({}{unzip_note}). Accept transfer{overwrite_note}? [Y/n] ",
        metadata.filename,
        human_readable_size(metadata.filesize)
    );
    std::io::stdout().flush().context("Failed to flush stdout")?;

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("Failed to read answer")?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "" | "y"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_paths_are_numbered_from_zero() {
        let destination = Path::new("archive.zip");
        assert_eq!(part_path(destination, 0), Path::new("archive.zip.part0"));
        assert_eq!(part_path(destination, 7), Path::new("archive.zip.part7"));
    }

    #[tokio::test]
    async fn write_part_concatenates_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.part0");
        write_part(
            &path,
            &[Bytes::from_static(b"ab"), Bytes::from_static(b"cd")],
        )
        .await
        .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn single_part_is_renamed_over_existing_destination() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("data.bin");
        std::fs::write(&destination, "stale").unwrap();
        let part = dir.path().join("data.bin.part0");
        std::fs::write(&part, "fresh").unwrap();

        merge_parts(&destination, &[part.clone()]).await.unwrap();
        assert_eq!(std::fs::read_to_string(&destination).unwrap(), "fresh");
        assert!(!part.exists());
    }

    #[tokio::test]
    async fn multiple_parts_merge_in_order_and_are_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("data.bin");
        let first = dir.path().join("data.bin.part0");
        let second = dir.path().join("data.bin.part1");
        std::fs::write(&first, "hello ").unwrap();
        std::fs::write(&second, "world").unwrap();

        merge_parts(&destination, &[first.clone(), second.clone()])
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(&destination).unwrap(),
            "hello world"
        );
        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[tokio::test]
    async fn no_parts_yield_an_empty_destination() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("empty.bin");
        merge_parts(&destination, &[]).await.unwrap();
        assert_eq!(std::fs::metadata(&destination).unwrap().len(), 0);
    }
}
