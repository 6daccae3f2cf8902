use core::fmt;

use eyre::{bail, eyre, Result as EyreResult};
use libp2p::{PeerId, StreamProtocol};
use libp2p_stream::Control;
use multiaddr::Multiaddr;
use tokio::sync::{mpsc, oneshot};

use crate::address::PeerAddress;
use crate::stream::{into_peer_stream, Incoming, PeerStream};
use crate::Command;

/// Handle to the swarm event loop. Cheap to clone.
#[derive(Clone)]
pub struct NetworkClient {
    peer_id: PeerId,
    sender: mpsc::Sender<Command>,
    control: Control,
}

impl fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkClient")
            .field("peer_id", &self.peer_id)
            .finish_non_exhaustive()
    }
}

impl NetworkClient {
    pub(crate) const fn new(
        peer_id: PeerId,
        sender: mpsc::Sender<Command>,
        control: Control,
    ) -> Self {
        Self {
            peer_id,
            sender,
            control,
        }
    }

    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub async fn listen_on(&self, addr: Multiaddr) -> EyreResult<()> {
        let (sender, receiver) = oneshot::channel();

        self.send(Command::ListenOn { addr, sender }).await?;

        receiver.await.map_err(|_| eyre!("Network event loop stopped"))?
    }

    /// Resolves once a connection to the peer is established.
    pub async fn dial(&self, peer_addr: &PeerAddress) -> EyreResult<()> {
        let (sender, receiver) = oneshot::channel();

        self.send(Command::Dial {
            peer_addr: peer_addr.clone(),
            sender,
        })
        .await?;

        receiver.await.map_err(|_| eyre!("Network event loop stopped"))?
    }

    pub async fn open_stream(
        &self,
        peer_id: PeerId,
        protocol: StreamProtocol,
    ) -> EyreResult<PeerStream> {
        let mut control = self.control.clone();

        let stream = match control.open_stream(peer_id, protocol).await {
            Ok(stream) => stream,
            Err(err) => {
                bail!("Failed to open stream: {:?}", err);
            }
        };

        Ok(into_peer_stream(stream))
    }

    /// Registers the handler for a protocol. Each protocol can be accepted
    /// once per swarm.
    pub fn accept(&self, protocol: StreamProtocol) -> EyreResult<Incoming> {
        let mut control = self.control.clone();

        match control.accept(protocol.clone()) {
            Ok(incoming) => Ok(Incoming::new(protocol, incoming)),
            Err(err) => bail!("Failed to setup control for stream protocol: {:?}", err),
        }
    }

    async fn send(&self, command: Command) -> EyreResult<()> {
        self.sender
            .send(command)
            .await
            .map_err(|_| eyre!("Network event loop stopped"))
    }
}
