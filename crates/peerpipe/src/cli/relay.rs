use eyre::Result as EyreResult;
use futures_util::StreamExt;
use peerpipe_network::client::NetworkClient;
use peerpipe_network::stream::{Incoming, PeerStream, RELAY_PROTOCOL};
use peerpipe_relay::{PairingRegistry, RelayConfig, Registration};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

/// Routes every inbound relay stream through a fresh pairing registry.
pub fn start(
    client: &NetworkClient,
    config: RelayConfig,
    tracker: &TaskTracker,
    token: &CancellationToken,
) -> EyreResult<PairingRegistry<PeerStream>> {
    let incoming = client.accept(RELAY_PROTOCOL)?;
    let registry = PairingRegistry::with_token(config, token.child_token());

    info!(protocol = %incoming.protocol(), ?config, "Waiting for incoming connections");

    let _accepting = tracker.spawn(accept_loop(
        incoming,
        registry.clone(),
        token.child_token(),
    ));

    Ok(registry)
}

async fn accept_loop(
    mut incoming: Incoming,
    registry: PairingRegistry<PeerStream>,
    token: CancellationToken,
) {
    loop {
        let next = select! {
            next = incoming.next() => next,
            () = token.cancelled() => break,
        };

        let Some((peer_id, stream)) = next else {
            break;
        };

        info!(%peer_id, "Got a new stream");

        // registered inline so slots fill in arrival order
        match registry.on_inbound_stream(stream).await {
            Registration::Waiting { cycle } => debug!(%peer_id, cycle, "Stream parked"),
            Registration::Paired { cycle, relay } => {
                debug!(%peer_id, cycle, "Stream paired");
                drop(relay);
            }
            Registration::Rejected => debug!(%peer_id, "Stream rejected"),
        }
    }

    debug!("Relay accept loop stopped");
}
