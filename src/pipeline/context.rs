//! Per-connection execution state held by the orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};

use crate::models::PreparedRequest;

/// State of the one in-flight send. The orchestrator is the only writer;
/// transport tasks observe it through the shared `cancelled` flag and the
/// channels handed out at spawn time.
#[derive(Debug)]
pub struct ExecutionContext {
    pub connection_id: u64,
    pub prepared: PreparedRequest,
    pub started_at: Instant,
    /// Status captured from the `Opened` event, for the history summary.
    pub status: Option<u16>,
    /// Message events seen so far.
    pub message_count: usize,
    cancelled: Arc<AtomicBool>,
    /// Signals the transport task to close the connection.
    close_tx: Option<oneshot::Sender<()>>,
    /// Outbound frames for WebSocket sends; `None` for other transports.
    outbound_tx: Option<mpsc::UnboundedSender<String>>,
}

impl ExecutionContext {
    pub fn new(connection_id: u64, prepared: PreparedRequest) -> Self {
        ExecutionContext {
            connection_id,
            prepared,
            started_at: Instant::now(),
            status: None,
            message_count: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
            close_tx: None,
            outbound_tx: None,
        }
    }

    /// Flag shared with the transport task; checked before every emit so a
    /// cancelled connection stops producing events immediately.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Register the close channel for the spawned transport task.
    pub fn set_close_channel(&mut self, tx: oneshot::Sender<()>) {
        self.close_tx = Some(tx);
    }

    pub fn set_outbound_channel(&mut self, tx: mpsc::UnboundedSender<String>) {
        self.outbound_tx = Some(tx);
    }

    /// Queue a text frame if this connection accepts outbound messages.
    pub fn send_text(&self, text: String) -> bool {
        match &self.outbound_tx {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    /// Mark the connection cancelled and ask the transport to shut down.
    /// Safe to call more than once.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(tx) = self.close_tx.take() {
            // The task may have already exited.
            let _ = tx.send(());
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}
