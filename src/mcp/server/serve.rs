//! Newline-delimited JSON-RPC serving over a byte stream (stdio by default).

use super::dispatch::parse_error_response;
use super::McpServer;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

impl McpServer {
    /// Serves on the process's stdin/stdout until stdin closes.
    pub async fn serve_stdio(&self) -> Result<(), String> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serves requests read from `reader`, writing replies and
    /// `list_changed` notifications to `writer`. Requests are handled
    /// concurrently, so replies may be written out of order.
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<(), String>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<Value>();
        let writer_task = tokio::spawn(write_frames(writer, out_rx));

        let mut session = self.attach_session().await;
        let notification_tx = out_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = session.recv().await {
                if notification_tx.send(notification).is_err() {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(reader).lines();
        let read_result = loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break Ok(()),
                Err(err) => break Err(err.to_string()),
            };
            if line.trim().is_empty() {
                continue;
            }
            let server = self.clone();
            let reply_tx = out_tx.clone();
            tokio::spawn(async move {
                let reply = match serde_json::from_str::<Value>(&line) {
                    Ok(message) => server.handle_message(message).await,
                    Err(err) => Some(parse_error_response(&err.to_string())),
                };
                if let Some(reply) = reply {
                    let _ = reply_tx.send(reply);
                }
            });
        };

        debug!(server = %self.name(), "MCP input closed; draining replies");
        forwarder.abort();
        drop(out_tx);
        if let Err(err) = writer_task.await {
            warn!(server = %self.name(), error = %err, "MCP writer task failed");
        }
        read_result
    }
}

async fn write_frames<W>(mut writer: W, mut frames: mpsc::UnboundedReceiver<Value>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = frames.recv().await {
        let mut line = frame.to_string();
        line.push('\n');
        if writer.write_all(line.as_bytes()).await.is_err() || writer.flush().await.is_err() {
            break;
        }
    }
}
