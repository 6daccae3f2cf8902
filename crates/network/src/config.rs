use core::net::Ipv4Addr;
use core::time::Duration;

use libp2p::identity;
use multiaddr::{Multiaddr, Protocol};

pub const DEFAULT_IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct NetworkConfig {
    pub identity: identity::Keypair,
    pub listen: Vec<Multiaddr>,
    pub idle_connection_timeout: Duration,
}

impl NetworkConfig {
    #[must_use]
    pub const fn new(identity: identity::Keypair, listen: Vec<Multiaddr>) -> Self {
        Self {
            identity,
            listen,
            idle_connection_timeout: DEFAULT_IDLE_CONNECTION_TIMEOUT,
        }
    }
}

/// TCP listen address on every IPv4 interface. Port 0 lets the OS pick.
#[must_use]
pub fn tcp_listen_addr(port: u16) -> Multiaddr {
    Multiaddr::empty()
        .with(Protocol::Ip4(Ipv4Addr::UNSPECIFIED))
        .with(Protocol::Tcp(port))
}

/// TCP listen address on the loopback interface only.
#[must_use]
pub fn loopback_listen_addr(port: u16) -> Multiaddr {
    Multiaddr::empty()
        .with(Protocol::Ip4(Ipv4Addr::LOCALHOST))
        .with(Protocol::Tcp(port))
}
