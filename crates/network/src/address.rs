use core::fmt;
use core::str::FromStr;

use libp2p::PeerId;
use multiaddr::{Multiaddr, Protocol};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AddressError {
    #[error("invalid multiaddr: {0}")]
    Parse(#[from] multiaddr::Error),

    #[error("no peer ID in address: {0}")]
    MissingPeerId(Multiaddr),

    #[error("no transport address before the peer ID")]
    MissingTransport,
}

/// A dial-able peer: transport address plus the `/p2p/<peer id>` suffix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerAddress {
    peer_id: PeerId,
    transport: Multiaddr,
}

impl PeerAddress {
    #[must_use]
    pub const fn new(peer_id: PeerId, transport: Multiaddr) -> Self {
        Self { peer_id, transport }
    }

    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    #[must_use]
    pub const fn transport(&self) -> &Multiaddr {
        &self.transport
    }

    #[must_use]
    pub fn to_multiaddr(&self) -> Multiaddr {
        self.transport.clone().with(Protocol::P2p(self.peer_id))
    }
}

impl TryFrom<Multiaddr> for PeerAddress {
    type Error = AddressError;

    fn try_from(mut addr: Multiaddr) -> Result<Self, Self::Error> {
        let Some(Protocol::P2p(peer_id)) = addr.pop() else {
            return Err(AddressError::MissingPeerId(addr));
        };

        if addr.is_empty() {
            return Err(AddressError::MissingTransport);
        }

        Ok(Self::new(peer_id, addr))
    }
}

impl FromStr for PeerAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<Multiaddr>()?.try_into()
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/p2p/{}", self.transport, self.peer_id)
    }
}
