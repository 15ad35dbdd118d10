//! WebSocket transport.

use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::session::Session;
use crate::ClientError;

/// Dial the configured endpoint and attach the socket to `session`.
///
/// Spawns a writer task that drains the session's outbox into the socket and
/// a reader task that feeds every text frame to the session in order.
pub(crate) async fn connect(session: &Arc<Session>) -> Result<(), ClientError> {
    let url = session.config.url.as_str();
    let (ws, _) = tokio_tungstenite::connect_async(url).await?;
    tracing::debug!("Connected to {}", url);
    let (mut sink, mut stream) = ws.split();

    let (outbox, mut frames) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if let Err(e) = sink.send(Message::Text(frame.into())).await {
                tracing::debug!("WebSocket write failed: {}", e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    let generation = session.open(outbox);

    let reader = Arc::clone(session);
    let handle = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::debug!("WebSocket error: {}", e);
                    break;
                }
            };
            match msg {
                Message::Text(text) => reader.receive(&text),
                Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                    Ok(text) => reader.receive(text),
                    Err(e) => tracing::warn!("Dropping non-UTF-8 frame: {}", e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        reader.connection_lost(generation);
    });
    session.set_reader(handle.abort_handle());
    Ok(())
}
