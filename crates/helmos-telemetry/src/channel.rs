//! [`TelemetryChannel`] – one background task per physical link.
//!
//! The task owns the transport exclusively. It receives frames, decodes
//! them and publishes the latest record into a `watch` slot that the
//! aggregator reads without ever blocking on I/O. Outbound frames travel
//! through a bounded `mpsc` queue serviced by the same task, so the control
//! tick never touches the link directly.
//!
//! Failure policy:
//!
//! - Decode failure: `warn!`, discard the frame, keep the loop alive.
//! - Transport failure: mark the channel unhealthy and reconnect with
//!   exponential backoff (base 0.5 s, doubling, capped at 8 s, unlimited
//!   attempts). The stale `watch` value is left in place; the aggregator's
//!   staleness window ages it out.
//! - Stop signal: observed within one loop iteration, including mid-backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use helmos_types::{ChannelError, ChannelId, TelemetryRecord};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::decode::FrameDecoder;
use crate::transport::Transport;

/// Default deadline for [`TelemetryChannel::send`].
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Depth of the outbound frame queue.
pub const OUTBOUND_QUEUE_DEPTH: usize = 16;

/// How long the receive loop waits for a frame before re-checking its stop
/// signal.
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(8);

/// Reconnect delay for the given attempt: 0.5 s, 1 s, 2 s, 4 s, 8 s, 8 s, …
pub fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE
        .saturating_mul(1u32 << attempt.min(4))
        .min(BACKOFF_CAP)
}

/// Handle to one telemetry link and its background receive task.
pub struct TelemetryChannel {
    id: ChannelId,
    latest_rx: watch::Receiver<Option<TelemetryRecord>>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    stop_tx: watch::Sender<bool>,
    healthy: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
    send_timeout: Duration,
}

impl TelemetryChannel {
    /// Connect the transport and spawn the receive task.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when the initial connect fails; no
    /// task is spawned in that case.
    pub async fn connect(
        id: ChannelId,
        mut transport: Box<dyn Transport>,
        decoder: Box<dyn FrameDecoder>,
    ) -> Result<Self, ChannelError> {
        transport.connect().await?;
        info!(channel = %id, "telemetry channel connected");

        let (latest_tx, latest_rx) = watch::channel(None);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (stop_tx, stop_rx) = watch::channel(false);
        let healthy = Arc::new(AtomicBool::new(true));

        let worker = ChannelWorker {
            id,
            transport,
            decoder,
            latest_tx,
            outbound_rx,
            stop_rx,
            healthy: Arc::clone(&healthy),
        };
        let task = tokio::spawn(worker.run());

        Ok(Self {
            id,
            latest_rx,
            outbound_tx,
            stop_tx,
            healthy,
            task: Mutex::new(Some(task)),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        })
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Latest decoded record, independent of whether anyone consumed it.
    pub fn latest(&self) -> Option<TelemetryRecord> {
        *self.latest_rx.borrow()
    }

    /// False while the background task is in backoff reconnect.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Queue one outbound frame.
    ///
    /// # Errors
    ///
    /// [`ChannelError::WriteTimeout`] when the queue stays full past the
    /// send deadline, so a dead link can never stall a control tick.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), ChannelError> {
        self.outbound_tx
            .send_timeout(bytes, self.send_timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => ChannelError::WriteTimeout {
                    channel: self.id,
                    timeout_ms: self.send_timeout.as_millis() as u64,
                },
                SendTimeoutError::Closed(_) => ChannelError::Closed { channel: self.id },
            })
    }

    /// Stop the receive task and wait for it to release the transport.
    /// Idempotent; later calls return once the task is already gone.
    pub async fn disconnect(&self) {
        let _ = self.stop_tx.send(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            let _ = task.await;
            info!(channel = %self.id, "telemetry channel disconnected");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Background task
// ─────────────────────────────────────────────────────────────────────────────

struct ChannelWorker {
    id: ChannelId,
    transport: Box<dyn Transport>,
    decoder: Box<dyn FrameDecoder>,
    latest_tx: watch::Sender<Option<TelemetryRecord>>,
    outbound_rx: mpsc::Receiver<Vec<u8>>,
    stop_rx: watch::Receiver<bool>,
    healthy: Arc<AtomicBool>,
}

impl ChannelWorker {
    async fn run(mut self) {
        loop {
            tokio::select! {
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        break;
                    }
                }
                Some(bytes) = self.outbound_rx.recv() => {
                    if let Err(e) = self.transport.send(&bytes).await {
                        warn!(channel = %self.id, error = %e, "outbound write failed");
                        if !self.reconnect().await {
                            break;
                        }
                    }
                }
                result = self.transport.recv(RECV_TIMEOUT) => match result {
                    Ok(Some(frame)) => self.ingest(&frame),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(channel = %self.id, error = %e, "transport receive failed");
                        if !self.reconnect().await {
                            break;
                        }
                    }
                }
            }
        }
        self.transport.close().await;
        debug!(channel = %self.id, "receive loop stopped");
    }

    fn ingest(&mut self, frame: &[u8]) {
        match self.decoder.decode(frame) {
            Ok(record) => {
                trace!(channel = %self.id, kind = record.kind(), "record published");
                self.latest_tx.send_replace(Some(record));
                self.healthy.store(true, Ordering::Relaxed);
            }
            Err(e) => warn!(channel = %self.id, error = %e, "malformed frame discarded"),
        }
    }

    /// Backoff-reconnect until the link is back or the stop signal fires.
    /// Returns false when stopped.
    async fn reconnect(&mut self) -> bool {
        self.healthy.store(false, Ordering::Relaxed);
        self.transport.close().await;

        let mut attempt = 0u32;
        loop {
            let delay = backoff_delay(attempt);
            debug!(
                channel = %self.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );
            tokio::select! {
                changed = self.stop_rx.changed() => {
                    if changed.is_err() || *self.stop_rx.borrow() {
                        return false;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
            if *self.stop_rx.borrow() {
                return false;
            }
            match self.transport.connect().await {
                Ok(()) => {
                    info!(channel = %self.id, attempt, "reconnected");
                    self.healthy.store(true, Ordering::Relaxed);
                    return true;
                }
                Err(e) => {
                    warn!(channel = %self.id, attempt, error = %e, "reconnect failed");
                    attempt += 1;
                }
            }
        }
    }
}
