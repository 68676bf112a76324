//! Link transport abstractions.
//!
//! A peer link is any bidirectional message transport that carries
//! text frames (a websocket, a pipe, an in-process channel). The core
//! only needs an outbound [`FrameSink`] and an inbound frame stream;
//! [`memory_pair`] cross-wires two in-process links for tests and
//! same-process federation.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors related to link transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("link closed")]
    Closed,
}

/// One message boundary of the underlying transport.
///
/// The peer protocol is text-only; binary frames are rejected at the
/// session boundary.
#[derive(Clone, Debug)]
pub enum LinkFrame {
    Text(String),
    Binary(Vec<u8>),
}

/// Channel sender for inbound link frames.
pub type FrameTx = mpsc::Sender<LinkFrame>;

/// Channel receiver for inbound link frames.
pub type FrameRx = mpsc::Receiver<LinkFrame>;

/// Create a frame channel with the given buffer size.
pub fn frame_channel(buffer: usize) -> (FrameTx, FrameRx) {
    mpsc::channel(buffer)
}

/// Outbound half of a peer link.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Send one text frame to the peer.
    async fn send(&self, frame: String) -> Result<(), TransportError>;
}

/// [`FrameSink`] backed by a frame channel.
pub struct ChannelSink {
    tx: FrameTx,
}

impl ChannelSink {
    /// Wrap a frame channel sender.
    pub fn new(tx: FrameTx) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.tx
            .send(LinkFrame::Text(frame))
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// One endpoint of a peer link: where to send, and what arrives.
pub struct LinkHandle {
    /// Outbound frames to the peer.
    pub sink: Arc<dyn FrameSink>,
    /// Inbound frames from the peer.
    pub rx: FrameRx,
}

impl LinkHandle {
    /// Build a handle from its halves.
    pub fn new(sink: Arc<dyn FrameSink>, rx: FrameRx) -> Self {
        Self { sink, rx }
    }
}

/// Create two cross-wired in-process link endpoints.
///
/// Frames sent on one handle's sink arrive on the other handle's
/// receiver. Dropping either handle closes the link in both
/// directions.
pub fn memory_pair(buffer: usize) -> (LinkHandle, LinkHandle) {
    let (a_tx, a_rx) = frame_channel(buffer);
    let (b_tx, b_rx) = frame_channel(buffer);
    let a = LinkHandle::new(Arc::new(ChannelSink::new(b_tx)), a_rx);
    let b = LinkHandle::new(Arc::new(ChannelSink::new(a_tx)), b_rx);
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_is_cross_wired() {
        let (a, mut b) = memory_pair(4);

        a.sink.send("hello".to_string()).await.unwrap();
        match b.rx.recv().await.unwrap() {
            LinkFrame::Text(text) => assert_eq!(text, "hello"),
            LinkFrame::Binary(_) => panic!("expected text frame"),
        }
    }

    #[tokio::test]
    async fn test_send_after_peer_drop_fails() {
        let (a, b) = memory_pair(4);
        drop(b);

        let err = a.sink.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn test_drop_closes_receiver() {
        let (a, mut b) = memory_pair(4);
        drop(a);
        assert!(b.rx.recv().await.is_none());
    }
}
