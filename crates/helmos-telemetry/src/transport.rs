//! Byte-level link contract.
//!
//! A [`Transport`] moves opaque frames over one physical link. Framing is
//! the transport's job (newline splitting on serial, one CAN frame per
//! `recv`); interpretation belongs to the decoders in [`crate::decode`].
//!
//! Real serial, SocketCAN and Bluetooth transports live outside this
//! workspace; the [`LoopbackTransport`] here backs tests and the sim binary.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use helmos_types::{ChannelError, ChannelId};

/// One physical telemetry link.
///
/// Implementations must be cancel-safe in `recv`: dropping the future mid
/// wait must not lose a frame.
#[async_trait]
pub trait Transport: Send {
    /// Open the link. Called once before the receive loop starts and again
    /// on every reconnect attempt.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Wait up to `timeout` for the next frame.
    ///
    /// `Ok(None)` means the link is idle, not broken; the receive loop uses
    /// short timeouts so it can observe its stop signal between frames.
    async fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, ChannelError>;

    /// Write one frame to the link.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError>;

    fn is_open(&self) -> bool;

    /// Close the link. Safe to call on an already closed transport.
    async fn close(&mut self);
}

// ─────────────────────────────────────────────────────────────────────────────
// Loopback
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct LoopbackState {
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    open: bool,
    /// Number of upcoming `connect` calls that should fail.
    failing_connects: usize,
    /// Error to return from the next `recv`.
    pending_error: Option<String>,
}

/// In-memory [`Transport`] for tests and the sim binary.
///
/// The paired [`LoopbackHandle`] stays on the test side: it pushes inbound
/// frames, inspects sent bytes and injects faults while the transport itself
/// is owned by the channel's background task.
#[derive(Debug)]
pub struct LoopbackTransport {
    channel: ChannelId,
    state: Arc<Mutex<LoopbackState>>,
}

/// Test-side handle to a [`LoopbackTransport`].
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new(channel: ChannelId) -> (Self, LoopbackHandle) {
        let state = Arc::new(Mutex::new(LoopbackState::default()));
        let handle = LoopbackHandle {
            state: Arc::clone(&state),
        };
        (Self { channel, state }, handle)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LoopbackHandle {
    fn lock(&self) -> std::sync::MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a frame for the next `recv`.
    pub fn push_frame(&self, bytes: impl Into<Vec<u8>>) {
        self.lock().inbound.push_back(bytes.into());
    }

    /// Frames written through `send`, oldest first.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Make the next `recv` fail with a transport error.
    pub fn inject_recv_error(&self, details: impl Into<String>) {
        self.lock().pending_error = Some(details.into());
    }

    /// Make the next `n` `connect` attempts fail.
    pub fn fail_connects(&self, n: usize) {
        self.lock().failing_connects = n;
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&mut self) -> Result<(), ChannelError> {
        let mut state = self.lock();
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(ChannelError::Transport {
                channel: self.channel,
                details: "loopback connect refused".into(),
            });
        }
        state.open = true;
        Ok(())
    }

    async fn recv(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, ChannelError> {
        {
            let mut state = self.lock();
            if let Some(details) = state.pending_error.take() {
                state.open = false;
                return Err(ChannelError::Transport {
                    channel: self.channel,
                    details,
                });
            }
            if let Some(frame) = state.inbound.pop_front() {
                return Ok(Some(frame));
            }
        }
        // Idle: wait out the timeout so the caller can poll its stop signal.
        tokio::time::sleep(timeout).await;
        Ok(self.lock().inbound.pop_front())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let mut state = self.lock();
        if !state.open {
            return Err(ChannelError::Closed {
                channel: self.channel,
            });
        }
        state.sent.push(bytes.to_vec());
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    async fn close(&mut self) {
        self.lock().open = false;
    }
}
