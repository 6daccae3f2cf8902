use core::time::Duration;

use camino::Utf8PathBuf;
use clap::Parser;
use const_format::concatcp;
use eyre::{Result as EyreResult, WrapErr};
use libp2p::identity::Keypair;
use libp2p::PeerId;
use owo_colors::OwoColorize;
use peerpipe_network::address::PeerAddress;
use peerpipe_network::config::{tcp_listen_addr, NetworkConfig};
use peerpipe_network::identity;
use peerpipe_network::types::NetworkEvent;
use peerpipe_relay::RelayConfig;
use tokio::sync::mpsc;
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::ConfigFile;
use crate::defaults;

mod relay;
mod transfer;

pub const EXAMPLES: &str = r"
  # Start a relay on port 4001
  $ peerpipe -p 4001

  # Exchange files with a peer, typing paths at the prompt
  $ peerpipe -d /ip4/127.0.0.1/tcp/4001/p2p/12D3KooW...

  # Only receive files, into ./inbox
  $ peerpipe --receive --output-dir inbox

  # Exchange files with whoever else is connected to a relay
  $ peerpipe --via-relay -d /ip4/203.0.113.7/tcp/4001/p2p/12D3KooW...
";

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(after_help = concatcp!(
    "Environment variables:\n",
    "  PEERPIPE_HOME    Directory holding config.toml with a persistent identity\n\n",
    "Examples:",
    EXAMPLES
))]
pub struct RootCommand {
    #[command(flatten)]
    pub args: RootArgs,
}

#[derive(Debug, Parser)]
pub struct RootArgs {
    /// Port to listen on, 0 picks a free one
    #[arg(short, long, alias = "sp", value_name = "PORT", default_value_t = 0)]
    pub port: u16,

    /// Peer to connect to, as a multiaddr ending in /p2p/<peer id>
    #[arg(short, long, value_name = "MULTIADDR")]
    pub destination: Option<String>,

    /// Derive the peer ID from the port so it is the same on every run.
    /// Insecure, for debugging only
    #[arg(long)]
    pub debug: bool,

    /// Listen and receive files without relaying
    #[arg(long, conflicts_with = "destination")]
    pub receive: bool,

    /// Treat the destination as a relay and exchange files over one stream
    #[arg(long, requires = "destination")]
    pub via_relay: bool,

    /// Directory received files are written to
    #[arg(long, value_name = "DIR", default_value_t = defaults::default_output_dir())]
    pub output_dir: Utf8PathBuf,

    /// Write each incoming stream verbatim to this file instead of
    /// expecting file frames
    #[arg(long, value_name = "PATH", conflicts_with = "via_relay")]
    pub raw_output: Option<Utf8PathBuf>,

    /// Seconds a relay keeps draining after one side has closed
    #[arg(long, value_name = "SECS")]
    pub drain_timeout: Option<u64>,

    /// Directory for config.toml, the identity is ephemeral without it
    #[arg(long, value_name = "DIR")]
    #[arg(env = "PEERPIPE_HOME", hide_env_values = true)]
    pub home: Option<Utf8PathBuf>,
}

#[derive(Debug)]
enum Mode {
    Relay(RelayConfig),
    Receive,
    Transfer(PeerAddress),
    RelayClient(PeerAddress),
}

impl RootCommand {
    pub async fn run(self) -> EyreResult<()> {
        let args = self.args;

        let mode = args.mode()?;
        let (keypair, port) = args.identity()?;

        let config = NetworkConfig::new(keypair, vec![tcp_listen_addr(port)]);
        let (client, events) = peerpipe_network::run(&config)
            .await
            .wrap_err("failed to start the network")?;

        info!(peer_id = %client.peer_id(), ?mode, "Node started");

        let tracker = TaskTracker::new();
        let token = CancellationToken::new();

        let _reporter = tracker.spawn(report_events(
            events,
            client.peer_id(),
            token.child_token(),
        ));

        let registry = match mode {
            Mode::Relay(relay_config) => Some(relay::start(
                &client,
                relay_config,
                &tracker,
                &token,
            )?),
            Mode::Receive => {
                let output = args.output();
                transfer::start_receiving(&client, output, &tracker, &token)?;
                None
            }
            Mode::Transfer(peer) => {
                let output = args.output();
                transfer::start_receiving(&client, output, &tracker, &token)?;

                client
                    .dial(&peer)
                    .await
                    .wrap_err_with(|| format!("failed to connect to {peer}"))?;

                info!(peer_id = %peer.peer_id(), "Connected");

                let _sender = tracker.spawn(transfer::send_loop(
                    client.clone(),
                    peer.peer_id(),
                    token.child_token(),
                ));
                None
            }
            Mode::RelayClient(peer) => {
                client
                    .dial(&peer)
                    .await
                    .wrap_err_with(|| format!("failed to connect to relay {peer}"))?;

                info!(relay = %peer.peer_id(), "Connected to relay");

                let _session = tracker.spawn(transfer::relay_session(
                    client.clone(),
                    peer.peer_id(),
                    args.output_dir.clone().into_std_path_buf(),
                    token.child_token(),
                ));
                None
            }
        };

        signal::ctrl_c().await?;

        info!("Shutting down");

        token.cancel();

        if let Some(registry) = registry {
            registry.shutdown().await;
        }

        let _closed = tracker.close();
        tracker.wait().await;

        Ok(())
    }
}

impl RootArgs {
    fn mode(&self) -> EyreResult<Mode> {
        let destination = self
            .destination
            .as_deref()
            .map(str::parse::<PeerAddress>)
            .transpose()
            .wrap_err("invalid destination address")?;

        let mode = match destination {
            Some(peer) if self.via_relay => Mode::RelayClient(peer),
            Some(peer) => Mode::Transfer(peer),
            None if self.receive || self.raw_output.is_some() => Mode::Receive,
            None => Mode::Relay(RelayConfig {
                drain_timeout: self.drain_timeout.map(Duration::from_secs),
            }),
        };

        Ok(mode)
    }

    fn identity(&self) -> EyreResult<(Keypair, u16)> {
        if self.debug {
            warn!(
                port = self.port,
                "Using a port-derived identity, anyone can impersonate this node"
            );

            let keypair = identity::deterministic(self.port)
                .wrap_err("failed to derive the debug identity")?;

            return Ok((keypair, self.port));
        }

        let Some(home) = &self.home else {
            return Ok((identity::generate(), self.port));
        };

        let config = ConfigFile::load_or_init(home)?;
        let port = if self.port == 0 { config.port } else { self.port };

        Ok((config.identity, port))
    }

    fn output(&self) -> transfer::Output {
        self.raw_output.as_ref().map_or_else(
            || transfer::Output::Directory(self.output_dir.clone().into_std_path_buf()),
            |path| transfer::Output::Raw(path.clone().into_std_path_buf()),
        )
    }
}

async fn report_events(
    mut events: mpsc::Receiver<NetworkEvent>,
    local: PeerId,
    token: CancellationToken,
) {
    loop {
        let event = select! {
            event = events.recv() => event,
            () = token.cancelled() => break,
        };

        let Some(event) = event else {
            break;
        };

        match event {
            NetworkEvent::ListeningOn { address } => {
                info!("{}: {address}/p2p/{local}", "Listening on".green());
                info!("Run 'peerpipe -d {address}/p2p/{local}' on another console");
            }
            NetworkEvent::ConnectionEstablished { peer_id } => {
                info!(%peer_id, "Peer connected");
            }
            NetworkEvent::ConnectionClosed { peer_id } => {
                info!(%peer_id, "Peer disconnected");
            }
            _ => {}
        }
    }
}
