use std::collections::hash_map::{Entry, HashMap};

use eyre::{eyre, Result as EyreResult};
use futures_util::StreamExt;
use libp2p::identify::{Behaviour as IdentifyBehaviour, Config as IdentifyConfig};
use libp2p::noise::Config as NoiseConfig;
use libp2p::ping::Behaviour as PingBehaviour;
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{NetworkBehaviour, Swarm, SwarmEvent};
use libp2p::tcp::Config as TcpConfig;
use libp2p::tls::Config as TlsConfig;
use libp2p::yamux::Config as YamuxConfig;
use libp2p::{PeerId, SwarmBuilder};
use libp2p_stream::Behaviour as StreamBehaviour;
use owo_colors::OwoColorize;
use tokio::sync::{mpsc, oneshot};
use tokio::{select, spawn};
use tracing::{debug, trace, warn};

use crate::address::PeerAddress;
use crate::client::NetworkClient;
use crate::config::NetworkConfig;
use crate::types::NetworkEvent;

pub mod address;
pub mod client;
pub mod config;
pub mod identity;
pub mod stream;
pub mod types;

const PROTOCOL_VERSION: &str = concat!("/", env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(NetworkBehaviour)]
struct Behaviour {
    identify: IdentifyBehaviour,
    ping: PingBehaviour,
    stream: StreamBehaviour,
}

/// Builds the swarm, spawns its event loop and starts listening on every
/// configured address.
pub async fn run(
    config: &NetworkConfig,
) -> EyreResult<(NetworkClient, mpsc::Receiver<NetworkEvent>)> {
    let (client, event_receiver, event_loop) = init(config)?;

    drop(spawn(event_loop.run()));

    for addr in &config.listen {
        client.listen_on(addr.clone()).await?;
    }

    Ok((client, event_receiver))
}

fn init(
    config: &NetworkConfig,
) -> EyreResult<(NetworkClient, mpsc::Receiver<NetworkEvent>, EventLoop)> {
    let peer_id = config.identity.public().to_peer_id();

    let swarm = SwarmBuilder::with_existing_identity(config.identity.clone())
        .with_tokio()
        .with_tcp(
            TcpConfig::default(),
            (TlsConfig::new, NoiseConfig::new),
            YamuxConfig::default,
        )?
        .with_behaviour(|key| Behaviour {
            identify: IdentifyBehaviour::new(IdentifyConfig::new(
                PROTOCOL_VERSION.to_owned(),
                key.public(),
            )),
            ping: PingBehaviour::default(),
            stream: StreamBehaviour::new(),
        })?
        .with_swarm_config(|cfg| cfg.with_idle_connection_timeout(config.idle_connection_timeout))
        .build();

    let control = swarm.behaviour().stream.new_control();

    let (command_sender, command_receiver) = mpsc::channel(32);
    let (event_sender, event_receiver) = mpsc::channel(32);

    let client = NetworkClient::new(peer_id, command_sender, control);

    let event_loop = EventLoop::new(swarm, command_receiver, event_sender);

    Ok((client, event_receiver, event_loop))
}

#[derive(Debug)]
pub(crate) enum Command {
    ListenOn {
        addr: multiaddr::Multiaddr,
        sender: oneshot::Sender<EyreResult<()>>,
    },
    Dial {
        peer_addr: PeerAddress,
        sender: oneshot::Sender<EyreResult<()>>,
    },
}

pub(crate) struct EventLoop {
    swarm: Box<Swarm<Behaviour>>,
    command_receiver: mpsc::Receiver<Command>,
    event_sender: mpsc::Sender<NetworkEvent>,
    pending_dial: HashMap<PeerId, Vec<oneshot::Sender<EyreResult<()>>>>,
}

impl EventLoop {
    fn new(
        swarm: Swarm<Behaviour>,
        command_receiver: mpsc::Receiver<Command>,
        event_sender: mpsc::Sender<NetworkEvent>,
    ) -> Self {
        Self {
            swarm: Box::new(swarm),
            command_receiver,
            event_sender,
            pending_dial: HashMap::default(),
        }
    }

    pub(crate) async fn run(mut self) {
        #[expect(clippy::redundant_pub_crate, reason = "Needed for Tokio code")]
        loop {
            select! {
                event = self.swarm.select_next_some() => self.handle_swarm_event(event).await,
                command = self.command_receiver.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command);
                }
            }
        }

        debug!("Network client dropped, stopping the event loop");
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<BehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                self.emit(NetworkEvent::ListeningOn { address }).await;
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                debug!(%peer_id, address = %endpoint.get_remote_address(), "Connection established");

                if let Some(senders) = self.pending_dial.remove(&peer_id) {
                    for sender in senders {
                        drop(sender.send(Ok(())));
                    }
                }

                self.emit(NetworkEvent::ConnectionEstablished { peer_id })
                    .await;
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                debug!(%peer_id, ?cause, "Connection closed");

                if num_established == 0 {
                    self.emit(NetworkEvent::ConnectionClosed { peer_id }).await;
                }
            }
            SwarmEvent::OutgoingConnectionError {
                peer_id: Some(peer_id),
                error,
                ..
            } => {
                warn!(%peer_id, %error, "Outgoing connection failed");

                if let Some(senders) = self.pending_dial.remove(&peer_id) {
                    let error = error.to_string();
                    for sender in senders {
                        drop(sender.send(Err(eyre!("Failed to dial {peer_id}: {error}"))));
                    }
                }
            }
            SwarmEvent::Behaviour(BehaviourEvent::Identify(event)) => {
                trace!("{}: {:?}", "identify".yellow(), event);
            }
            SwarmEvent::Behaviour(BehaviourEvent::Ping(event)) => {
                trace!("{}: {:?}", "ping".yellow(), event);
            }
            event => trace!("{}: {:?}", "swarm".yellow(), event),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::ListenOn { addr, sender } => {
                let result = self
                    .swarm
                    .listen_on(addr)
                    .map(|_listener_id| ())
                    .map_err(|err| eyre!(err));
                drop(sender.send(result));
            }
            Command::Dial { peer_addr, sender } => self.dial(peer_addr, sender),
        }
    }

    fn dial(&mut self, peer_addr: PeerAddress, sender: oneshot::Sender<EyreResult<()>>) {
        let peer_id = peer_addr.peer_id();

        if self.swarm.is_connected(&peer_id) {
            drop(sender.send(Ok(())));
            return;
        }

        match self.pending_dial.entry(peer_id) {
            Entry::Occupied(mut entry) => entry.get_mut().push(sender),
            Entry::Vacant(entry) => {
                let opts = DialOpts::peer_id(peer_id)
                    .addresses(vec![peer_addr.transport().clone()])
                    .build();

                match self.swarm.dial(opts) {
                    Ok(()) => {
                        let _ignored = entry.insert(vec![sender]);
                    }
                    Err(err) => drop(sender.send(Err(eyre!(err)))),
                }
            }
        }
    }

    async fn emit(&mut self, event: NetworkEvent) {
        if self.event_sender.send(event).await.is_err() {
            trace!("Network event receiver dropped");
        }
    }
}
