//! The blocking duplex byte connection both the blocking synchronizer and reconnect run on.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::debug;

use crate::node::NodeId;

/// A duplex connection to a single peer.
///
/// The read and write halves are handed out independently so that two threads can drive one
/// direction each. Closing the connection through [`Connection::disconnect`] is the only way to
/// unblock a thread stuck in a read or write.
pub trait Connection: Send + Sync {
    type Reader: Read + Send;
    type Writer: Write + Send;

    fn self_id(&self) -> NodeId;

    fn other_id(&self) -> NodeId;

    /// Whether this side dialled the peer.
    fn is_outbound(&self) -> bool;

    fn reader(&self) -> io::Result<Self::Reader>;

    fn writer(&self) -> io::Result<Self::Writer>;

    fn timeout(&self) -> io::Result<Option<Duration>>;

    /// Applies `timeout` to both directions.
    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    fn description(&self) -> String {
        format!("{} -> {}", self.self_id(), self.other_id())
    }
}

/// [`Connection`] over a TCP stream.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    self_id: NodeId,
    other_id: NodeId,
    outbound: bool,
    connected: AtomicBool,
}

impl TcpConnection {
    #[must_use]
    pub const fn new(stream: TcpStream, self_id: NodeId, other_id: NodeId, outbound: bool) -> Self {
        Self {
            stream,
            self_id,
            other_id,
            outbound,
            connected: AtomicBool::new(true),
        }
    }

    /// Two connected ends over loopback, the first one outbound.
    pub fn loopback_pair(a: NodeId, b: NodeId) -> io::Result<(Self, Self)> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let outbound = TcpStream::connect(listener.local_addr()?)?;
        let (inbound, _) = listener.accept()?;

        outbound.set_nodelay(true)?;
        inbound.set_nodelay(true)?;

        Ok((
            Self::new(outbound, a, b, true),
            Self::new(inbound, b, a, false),
        ))
    }
}

impl Connection for TcpConnection {
    type Reader = TcpStream;
    type Writer = TcpStream;

    fn self_id(&self) -> NodeId {
        self.self_id
    }

    fn other_id(&self) -> NodeId {
        self.other_id
    }

    fn is_outbound(&self) -> bool {
        self.outbound
    }

    fn reader(&self) -> io::Result<Self::Reader> {
        self.stream.try_clone()
    }

    fn writer(&self) -> io::Result<Self::Writer> {
        self.stream.try_clone()
    }

    fn timeout(&self) -> io::Result<Option<Duration>> {
        self.stream.read_timeout()
    }

    fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)?;
        self.stream.set_write_timeout(timeout)
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            if let Err(err) = self.stream.shutdown(Shutdown::Both) {
                debug!(peer = %self.other_id, %err, "Shutdown of an already broken stream");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_pair_carries_bytes_both_ways() {
        let (a, b) = TcpConnection::loopback_pair(NodeId::new(1), NodeId::new(2)).expect("pair");

        a.writer().expect("writer").write_all(b"ping").expect("write");
        let mut buf = [0; 4];
        b.reader().expect("reader").read_exact(&mut buf).expect("read");
        assert_eq!(&buf, b"ping", "a to b");

        b.writer().expect("writer").write_all(b"pong").expect("write");
        a.reader().expect("reader").read_exact(&mut buf).expect("read");
        assert_eq!(&buf, b"pong", "b to a");

        assert!(a.is_outbound() && !b.is_outbound(), "direction");
        assert_eq!(b.other_id(), NodeId::new(1), "peer id");
    }

    #[test]
    fn test_disconnect_unblocks_peer_read() {
        let (a, b) = TcpConnection::loopback_pair(NodeId::new(1), NodeId::new(2)).expect("pair");

        a.disconnect();
        assert!(!a.is_connected(), "flag flipped");

        let mut buf = [0; 1];
        let read = b.reader().expect("reader").read(&mut buf).expect("eof, not an error");
        assert_eq!(read, 0, "peer observes end of stream");
    }

    #[test]
    fn test_timeout_roundtrip() {
        let (a, _b) = TcpConnection::loopback_pair(NodeId::new(1), NodeId::new(2)).expect("pair");

        a.set_timeout(Some(Duration::from_millis(250))).expect("set");
        assert_eq!(
            a.timeout().expect("get"),
            Some(Duration::from_millis(250)),
            "read timeout reflects the setting"
        );
    }
}
