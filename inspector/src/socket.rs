use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::InspectorError;

/// How long a settled session keeps reading before its tasks are aborted.
pub const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// What the reader task hands to the session driving a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Text(String),
    /// Close frame from the agent, or end of stream (`None` code).
    Closed(Option<u16>),
    Failed(String),
}

/// One websocket owned by exactly one call.
///
/// A writer task drains an unbounded queue into the sink and a reader task
/// forwards text frames, so the session itself only ever touches channels.
pub struct Connection {
    url: String,
    outbound: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    closed: AtomicBool,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl Connection {
    pub async fn connect(url: &str) -> Result<Connection, InspectorError> {
        tracing::debug!(%url, "Connecting to agent");
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| InspectorError::Transport(format!("failed to connect to {url}: {e}")))?;

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Inbound>();

        // writer task
        let writer_url = url.to_string();
        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = msg.is_close();
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!(url = %writer_url, "ws send error: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // reader task
        let reader = tokio::spawn(async move {
            while let Some(next) = stream.next().await {
                match next {
                    Ok(Message::Text(txt)) => {
                        if in_tx.send(Inbound::Text(txt)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let code = frame.map(|f| u16::from(f.code));
                        let _ = in_tx.send(Inbound::Closed(code));
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(Inbound::Failed(e.to_string()));
                        return;
                    }
                }
            }
            let _ = in_tx.send(Inbound::Closed(None));
        });

        Ok(Connection {
            url: url.to_string(),
            outbound: out_tx,
            inbound: in_rx,
            closed: AtomicBool::new(false),
            writer,
            reader,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn send_json<T: Serialize>(&self, value: &T) -> Result<(), InspectorError> {
        let payload = serde_json::to_string(value)
            .map_err(|e| InspectorError::InvalidArgument(format!("serialize request: {e}")))?;
        tracing::debug!(url = %self.url, preview = %payload.chars().take(120).collect::<String>(), "Sending to agent");
        self.outbound
            .send(Message::Text(payload))
            .map_err(|_| InspectorError::Transport("connection writer has stopped".into()))
    }

    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    /// Starts a client-initiated close. Returns `true` only for the call that
    /// actually closed the socket.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::debug!(url = %self.url, "Closing agent connection");
        let _ = self.outbound.send(Message::Close(None));
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes (if needed) and reads whatever the agent still sends for up to
    /// `grace`, handing each late text frame to `on_late`.
    pub async fn shutdown(mut self, grace: Duration, mut on_late: impl FnMut(String)) {
        self.close();
        let _ = tokio::time::timeout(grace, async {
            while let Some(inbound) = self.recv().await {
                match inbound {
                    Inbound::Text(txt) => on_late(txt),
                    Inbound::Closed(_) | Inbound::Failed(_) => break,
                }
            }
        })
        .await;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.writer.abort();
        self.reader.abort();
    }
}
