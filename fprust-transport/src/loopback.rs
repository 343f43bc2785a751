//! In-memory loopback transport
//!
//! Stands in for a serial link in tests: a [`LoopbackHandle`] scripts the
//! module side by pushing inbound chunks (with whatever fragmentation the
//! test wants) and inspecting the bytes the driver wrote. `receive` honors
//! its deadline against tokio's clock, so paused-time tests stay
//! deterministic.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::{Mutex, Notify};
use tokio::time::{timeout_at, Instant};
use tracing::trace;

use crate::{error::*, Transport};

#[derive(Default)]
struct Shared {
    inbound: VecDeque<Bytes>,
    outbound: Vec<u8>,
    closed: bool,
}

struct Inner {
    state: Mutex<Shared>,
    notify: Notify,
}

/// Loopback byte channel
pub struct LoopbackTransport {
    inner: Arc<Inner>,
    connected: bool,
}

/// Scripting side of a [`LoopbackTransport`]
#[derive(Clone)]
pub struct LoopbackHandle {
    inner: Arc<Inner>,
}

impl LoopbackTransport {
    /// Create a transport plus the handle scripting its far end
    pub fn new() -> (Self, LoopbackHandle) {
        let inner = Arc::new(Inner {
            state: Mutex::new(Shared::default()),
            notify: Notify::new(),
        });

        (
            Self {
                inner: Arc::clone(&inner),
                connected: false,
            },
            LoopbackHandle { inner },
        )
    }
}

impl LoopbackHandle {
    /// Queue one inbound chunk; each chunk is delivered by one `receive`
    pub async fn push(&self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        trace!("Scripting {} inbound bytes", chunk.len());

        self.inner.state.lock().await.inbound.push_back(chunk);
        self.inner.notify.notify_one();
    }

    /// Queue an inbound byte sequence split into `chunk_size`-byte pieces
    pub async fn push_fragmented(&self, data: &[u8], chunk_size: usize) {
        for piece in data.chunks(chunk_size.max(1)) {
            self.push(Bytes::copy_from_slice(piece)).await;
        }
    }

    /// All bytes the driver has written so far
    pub async fn written(&self) -> Vec<u8> {
        self.inner.state.lock().await.outbound.clone()
    }

    /// Drain the recorded writes
    pub async fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.state.lock().await.outbound)
    }

    /// Simulate the far end dropping the link
    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.notify.notify_one();
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(Error::ConnectionClosed);
        }

        state.outbound.extend_from_slice(data);
        Ok(())
    }

    async fn receive(&mut self, deadline: Duration) -> Result<BytesMut> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let until = Instant::now() + deadline;

        loop {
            // Arm before checking state so a push between the check and the
            // await cannot be missed.
            let notified = self.inner.notify.notified();

            {
                let mut state = self.inner.state.lock().await;
                if let Some(chunk) = state.inbound.pop_front() {
                    return Ok(BytesMut::from(&chunk[..]));
                }
                if state.closed {
                    return Err(Error::ConnectionClosed);
                }
            }

            if timeout_at(until, notified).await.is_err() {
                return Err(Error::ReadTimeout);
            }
        }
    }

    fn endpoint(&self) -> String {
        "loopback".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_send_records_bytes() {
        let (mut transport, handle) = LoopbackTransport::new();
        transport.connect().await.unwrap();

        transport.send(&[0xEF, 0x01, 0xAA]).await.unwrap();
        transport.send(&[0xBB]).await.unwrap();

        assert_eq!(handle.written().await, vec![0xEF, 0x01, 0xAA, 0xBB]);
    }

    #[tokio::test]
    async fn test_loopback_receive_scripted_chunk() {
        let (mut transport, handle) = LoopbackTransport::new();
        transport.connect().await.unwrap();

        handle.push(vec![0x01, 0x02]).await;

        let chunk = transport.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(chunk.as_ref(), &[0x01, 0x02]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loopback_receive_times_out() {
        let (mut transport, _handle) = LoopbackTransport::new();
        transport.connect().await.unwrap();

        let started = Instant::now();
        let result = transport.receive(Duration::from_millis(250)).await;

        assert!(matches!(result, Err(Error::ReadTimeout)));
        assert!(started.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_loopback_fragmentation() {
        let (mut transport, handle) = LoopbackTransport::new();
        transport.connect().await.unwrap();

        handle.push_fragmented(&[1, 2, 3, 4, 5], 2).await;

        let mut collected = Vec::new();
        for _ in 0..3 {
            collected.extend_from_slice(&transport.receive(Duration::from_secs(1)).await.unwrap());
        }
        assert_eq!(collected, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_loopback_close_ends_receive() {
        let (mut transport, handle) = LoopbackTransport::new();
        transport.connect().await.unwrap();

        handle.close().await;

        let result = transport.receive(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_loopback_requires_connect() {
        let (mut transport, _handle) = LoopbackTransport::new();

        assert!(matches!(
            transport.send(&[0x00]).await,
            Err(Error::NotConnected)
        ));
    }
}
