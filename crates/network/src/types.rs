pub use libp2p::identity::PeerId;
use multiaddr::Multiaddr;

#[derive(Debug)]
#[non_exhaustive]
pub enum NetworkEvent {
    ListeningOn { address: Multiaddr },
    ConnectionEstablished { peer_id: PeerId },
    ConnectionClosed { peer_id: PeerId },
}
