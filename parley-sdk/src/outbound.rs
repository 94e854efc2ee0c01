//! Outbound writer task.
//!
//! Lines are encoded by the caller and queued here in order. A single task
//! owns the write half, waits on the flood gate between lines and writes each
//! line whole. Closing the queue lets the task drain what is left until a
//! flush deadline; lines still queued after the deadline are dropped, never
//! cut short. The task is never aborted mid-write: past the deadline it
//! finishes the line in flight and then stops.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::irc::Message;
use crate::registry::SendError;
use crate::throttle::{FloodConfig, FloodGate};

/// How long `close` waits past the flush deadline for a write in progress.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

pub(crate) struct Outbound {
    tx: Option<mpsc::UnboundedSender<String>>,
    deadline: watch::Sender<Option<Instant>>,
    task: JoinHandle<std::io::Result<()>>,
}

impl Outbound {
    pub(crate) fn spawn<W>(writer: W, flood: FloodConfig) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (deadline, deadline_rx) = watch::channel(None);
        let task = tokio::spawn(write_loop(writer, rx, FloodGate::new(flood), deadline_rx));
        Self {
            tx: Some(tx),
            deadline,
            task,
        }
    }

    /// Encode and queue one message.
    pub(crate) fn push(&self, msg: &Message) -> Result<(), SendError> {
        let mut line = msg.encode()?;
        line.push_str("\r\n");
        let tx = self.tx.as_ref().ok_or(SendError::Closed)?;
        tx.send(line).map_err(|_| SendError::Closed)
    }

    /// Stop accepting lines and let the writer drain for up to `flush`.
    ///
    /// Returns the writer's I/O error, if it hit one.
    pub(crate) async fn close(mut self, flush: Duration) -> std::io::Result<()> {
        self.tx.take();
        self.deadline.send_replace(Some(Instant::now() + flush));
        match tokio::time::timeout(flush + CLOSE_GRACE, &mut self.task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => {
                warn!(error = %join, "Writer task failed");
                Ok(())
            }
            Err(_) => {
                // The task stops on its own once the line in flight is written.
                warn!("Writer stalled past flush deadline, detaching");
                Ok(())
            }
        }
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<String>,
    gate: FloodGate,
    mut deadline: watch::Receiver<Option<Instant>>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = rx.recv().await {
        let admitted = tokio::select! {
            _ = gate.ready() => true,
            _ = expired(&mut deadline) => false,
        };
        if !admitted {
            discard(&mut rx, 1);
            break;
        }
        debug!(line = %line.trim_end(), "->");
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        if passed(&deadline) {
            discard(&mut rx, 0);
            break;
        }
    }
    writer.shutdown().await
}

fn discard(rx: &mut mpsc::UnboundedReceiver<String>, mut dropped: usize) {
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        warn!(dropped, "Flush deadline passed, dropping queued lines");
    }
}

fn passed(deadline: &watch::Receiver<Option<Instant>>) -> bool {
    deadline.borrow().is_some_and(|at| Instant::now() >= at)
}

/// Resolves once a deadline is set and has passed.
async fn expired(deadline: &mut watch::Receiver<Option<Instant>>) {
    loop {
        let current = *deadline.borrow_and_update();
        match current {
            Some(at) => {
                tokio::time::sleep_until(at).await;
                return;
            }
            None => {
                if deadline.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn lines_are_written_in_order_and_terminated() {
        let (client, mut server) = tokio::io::duplex(1024);
        let outbound = Outbound::spawn(client, FloodConfig::unlimited());
        outbound.push(&Message::new("NICK", vec!["bot"])).unwrap();
        outbound.push(&Message::new("PRIVMSG", vec!["#c", "hi there"])).unwrap();
        outbound.close(Duration::from_secs(1)).await.unwrap();

        let mut written = String::new();
        server.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "NICK bot\r\nPRIVMSG #c :hi there\r\n");
    }

    #[tokio::test]
    async fn encode_failures_never_reach_the_queue() {
        let (client, mut server) = tokio::io::duplex(1024);
        let outbound = Outbound::spawn(client, FloodConfig::unlimited());
        let bad = Message::new("PRIVMSG", vec!["a b", "text"]);
        assert!(matches!(outbound.push(&bad), Err(SendError::Codec(_))));
        outbound.close(Duration::from_secs(1)).await.unwrap();

        let mut written = String::new();
        server.read_to_string(&mut written).await.unwrap();
        assert!(written.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_drops_throttled_lines() {
        let (client, mut server) = tokio::io::duplex(1024);
        let flood = FloodConfig {
            burst: 1,
            interval: Duration::from_secs(10),
        };
        let outbound = Outbound::spawn(client, flood);
        for n in 0..3 {
            outbound.push(&Message::new("PRIVMSG", vec!["#c", &n.to_string()])).unwrap();
        }
        outbound.close(Duration::from_secs(1)).await.unwrap();

        let mut written = String::new();
        server.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "PRIVMSG #c 0\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_finishes_its_line_after_close() {
        let (client, mut server) = tokio::io::duplex(8);
        let outbound = Outbound::spawn(client, FloodConfig::unlimited());
        outbound.push(&Message::new("QUIT", vec!["going away now"])).unwrap();
        outbound.push(&Message::new("PRIVMSG", vec!["#c", "late"])).unwrap();
        // Nobody reads until close has given up waiting.
        outbound.close(Duration::from_secs(1)).await.unwrap();

        let mut written = String::new();
        server.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "QUIT :going away now\r\n");
    }
}
