use std::net::SocketAddr;
use std::sync::Mutex;

/// The other end of a point-to-point pipe.
///
/// An opener dials a known address up front (`Fixed`). A creator doesn't know who will open the
/// pipe until the first datagram arrives, so it learns its peer from whoever reaches it first
/// (`Learned`).
pub enum Peer {
    Fixed(SocketAddr),
    Learned(Mutex<Option<SocketAddr>>),
}

impl Peer {
    pub fn fixed(addr: SocketAddr) -> Peer {
        Peer::Fixed(addr)
    }

    pub fn learned() -> Peer {
        Peer::Learned(Mutex::new(None))
    }

    /// The address to send to, if known yet.
    pub fn current(&self) -> Option<SocketAddr> {
        match self {
            Peer::Fixed(addr) => Some(*addr),
            Peer::Learned(slot) => *slot.lock().unwrap(),
        }
    }

    /// Record the sender of an inbound datagram. A no-op for a `Fixed` peer, whose address the
    /// connecting side already knows; a `Learned` peer adopts the most recent sender, since this
    /// transport only ever serves one remote endpoint at a time.
    pub fn observe(&self, addr: SocketAddr) {
        if let Peer::Learned(slot) = self {
            *slot.lock().unwrap() = Some(addr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn test_fixed_peer_ignores_observations() {
        let peer = Peer::fixed(addr(1));
        peer.observe(addr(2));
        assert_eq!(peer.current(), Some(addr(1)));
    }

    #[test]
    fn test_learned_peer_starts_unknown() {
        let peer = Peer::learned();
        assert_eq!(peer.current(), None);
    }

    #[test]
    fn test_learned_peer_adopts_most_recent_sender() {
        let peer = Peer::learned();
        peer.observe(addr(1));
        peer.observe(addr(2));
        assert_eq!(peer.current(), Some(addr(2)));
    }
}
