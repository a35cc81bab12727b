//! Group-broadcast transport seam
//!
//! The coordinator only needs "one master sends, N nodes receive, in order".
//! Real deployments plug a network transport in behind [`SyncTransport`];
//! [`LoopbackTransport`] connects master and nodes inside one process.

use bytes::Bytes;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Ordered, reliable group broadcast of sync frames
pub trait SyncTransport: Send {
    /// Send a frame to every node (master side)
    fn broadcast(&mut self, frame: Bytes);

    /// Next received frame, without blocking (node side)
    fn try_receive(&mut self) -> Option<Bytes>;
}

/// In-process broadcast channel
pub struct LoopbackTransport {
    sender: broadcast::Sender<Bytes>,
    receiver: Option<broadcast::Receiver<Bytes>>,
    lagged_frames: u64,
}

impl LoopbackTransport {
    /// Master endpoint keeping up to `capacity` frames for slow nodes
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            receiver: None,
            lagged_frames: 0,
        }
    }

    /// A node endpoint; receives frames broadcast from now on
    pub fn node(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver: Some(self.sender.subscribe()),
            lagged_frames: 0,
        }
    }

    pub fn node_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Frames this endpoint missed because it fell behind
    pub fn lagged_frames(&self) -> u64 {
        self.lagged_frames
    }
}

impl SyncTransport for LoopbackTransport {
    fn broadcast(&mut self, frame: Bytes) {
        if self.sender.send(frame).is_err() {
            tracing::trace!("No nodes connected, frame dropped");
        }
    }

    fn try_receive(&mut self) -> Option<Bytes> {
        let receiver = self.receiver.as_mut()?;
        loop {
            match receiver.try_recv() {
                Ok(frame) => return Some(frame),
                Err(TryRecvError::Lagged(n)) => {
                    tracing::warn!("Sync receiver lagged, skipped {} frames", n);
                    self.lagged_frames += n;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_receive_in_order() {
        let mut master = LoopbackTransport::new(8);
        let mut node = master.node();
        master.broadcast(Bytes::from_static(b"one"));
        master.broadcast(Bytes::from_static(b"two"));

        assert_eq!(node.try_receive().as_deref(), Some(&b"one"[..]));
        assert_eq!(node.try_receive().as_deref(), Some(&b"two"[..]));
        assert!(node.try_receive().is_none());
        assert!(master.try_receive().is_none());
    }

    #[test]
    fn test_lagging_node_continues_with_newest() {
        let mut master = LoopbackTransport::new(2);
        let mut node = master.node();
        for frame in [&b"a"[..], b"b", b"c", b"d"] {
            master.broadcast(Bytes::copy_from_slice(frame));
        }
        assert_eq!(node.try_receive().as_deref(), Some(&b"c"[..]));
        assert_eq!(node.lagged_frames(), 2);
    }

    #[test]
    fn test_late_node_sees_only_new_frames() {
        let mut master = LoopbackTransport::new(4);
        master.broadcast(Bytes::from_static(b"early"));
        let mut late = master.node();
        master.broadcast(Bytes::from_static(b"late"));
        assert_eq!(late.try_receive().as_deref(), Some(&b"late"[..]));
    }
}
