//! Newline-delimited JSON-RPC transport.
//!
//! Each inbound line is handled on its own task, so a slow command never
//! holds up the next request. Responses are written by a single writer task
//! in completion order.

use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::handler::McpHandler;

/// Serve requests from `reader` until EOF, then wait for in-flight requests
/// and flush their responses.
pub async fn serve<R, W>(handler: Arc<McpHandler>, reader: R, writer: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer_task = tokio::spawn(async move {
        let mut writer = writer;
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<_, io::Error>(())
    });

    let mut lines = reader.lines();
    let mut in_flight = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let handler = Arc::clone(&handler);
        let tx = tx.clone();
        in_flight.spawn(async move {
            if let Some(response) = handler.handle_line(&line).await
                && tx.send(response).is_err()
            {
                debug!("Response dropped: writer has stopped");
            }
        });

        while let Some(finished) = in_flight.try_join_next() {
            if let Err(e) = finished {
                error!("Request task failed: {}", e);
            }
        }
    }

    info!("Input closed; waiting for {} in-flight request(s)", in_flight.len());
    while let Some(finished) = in_flight.join_next().await {
        if let Err(e) = finished {
            error!("Request task failed: {}", e);
        }
    }
    drop(tx);

    writer_task.await.map_err(io::Error::other)?
}
