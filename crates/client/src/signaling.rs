use anyhow::{Context, Result};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tunnel_protocol::ClientRequest;

pub type SignalingStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect(server_address: &str) -> Result<SignalingStream> {
    let (ws, _) = connect_async(server_address).await.with_context(|| {
        format!("Failed to connect to the signalling server at {server_address}")
    })?;
    Ok(ws)
}

fn request_frame(request: &ClientRequest) -> Result<Message> {
    let json = serde_json::to_string(request).context("Failed to serialize request")?;
    Ok(Message::Text(json.into()))
}

/// Send one request. Generic over the sink so it works before and after the
/// stream is split.
pub async fn send_request<S>(sink: &mut S, request: &ClientRequest) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    sink.send(request_frame(request)?)
        .await
        .context("Failed to send signalling message")
}

/// Next text frame from the server; `None` once the connection is closed.
pub async fn next_text<S>(stream: &mut S) -> Result<Option<String>>
where
    S: Stream<Item = std::result::Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame.context("Signalling connection error")? {
            Message::Text(text) => return Ok(Some(text.to_string())),
            Message::Close(_) => return Ok(None),
            _ => {}
        }
    }
    Ok(None)
}
