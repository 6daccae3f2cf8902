use std::path::{Path, PathBuf};

use eyre::{bail, Result as EyreResult, WrapErr};
use futures_util::StreamExt;
use libp2p::PeerId;
use peerpipe_network::client::NetworkClient;
use peerpipe_network::stream::{Incoming, PeerStream, FILE_TRANSFER_PROTOCOL, RELAY_PROTOCOL};
use peerpipe_transfer::session::offer_file;
use peerpipe_transfer::{
    receive_file, receive_frames, receive_whole_stream, send_file, TransferHeader,
};
use tokio::fs::metadata;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::{pin, select};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::prompt::Prompt;

/// Where inbound transfer streams end up.
#[derive(Clone, Debug)]
pub enum Output {
    /// One `received_<name>` file per frame.
    Directory(PathBuf),
    /// Unframed: each stream overwrites this file.
    Raw(PathBuf),
}

pub fn start_receiving(
    client: &NetworkClient,
    output: Output,
    tracker: &TaskTracker,
    token: &CancellationToken,
) -> EyreResult<()> {
    let incoming = client.accept(FILE_TRANSFER_PROTOCOL)?;

    info!(protocol = %incoming.protocol(), ?output, "Accepting files");

    let _receiving = tracker.spawn(receive_loop(
        incoming,
        output,
        tracker.clone(),
        token.child_token(),
    ));

    Ok(())
}

async fn receive_loop(
    mut incoming: Incoming,
    output: Output,
    tracker: TaskTracker,
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

        debug!(%peer_id, "Incoming transfer");

        let output = output.clone();
        let token = token.clone();

        let _transfer = tracker.spawn(async move {
            select! {
                () = receive_one(peer_id, stream, &output) => {}
                () = token.cancelled() => {
                    warn!(%peer_id, "Transfer interrupted by shutdown");
                }
            }
        });
    }

    debug!("Receive loop stopped");
}

async fn receive_one(peer_id: PeerId, stream: PeerStream, output: &Output) {
    match output {
        Output::Directory(dir) => match receive_file(stream, dir).await {
            Ok(file) => info!(
                %peer_id,
                filename = %file.header.filename,
                byte_length = file.header.byte_length,
                path = %file.path.display(),
                "File received"
            ),
            Err(err) => warn!(%peer_id, %err, "Failed to receive file"),
        },
        Output::Raw(path) => match receive_whole_stream(stream, path).await {
            Ok(written) => info!(%peer_id, written, path = %path.display(), "Stream saved"),
            Err(err) => warn!(%peer_id, %err, "Failed to save stream"),
        },
    }
}

/// Sends every path typed at the prompt over its own stream.
pub async fn send_loop(client: NetworkClient, peer_id: PeerId, token: CancellationToken) {
    let mut prompt = Prompt::spawn();

    loop {
        let path = select! {
            path = prompt.next_path() => path,
            () = token.cancelled() => break,
        };

        let Some(path) = path else {
            info!("Input closed, nothing more to send");
            break;
        };

        let sent = select! {
            sent = send_one(&client, peer_id, &path) => sent,
            () = token.cancelled() => break,
        };

        match sent {
            Ok(header) => info!(
                %peer_id,
                filename = %header.filename,
                byte_length = header.byte_length,
                "File sent"
            ),
            Err(err) => error!(path = %path.display(), "Failed to send file: {err:?}"),
        }
    }
}

async fn send_one(client: &NetworkClient, peer_id: PeerId, path: &Path) -> EyreResult<TransferHeader> {
    ensure_regular_file(path).await?;

    let mut stream = client.open_stream(peer_id, FILE_TRANSFER_PROTOCOL).await?;

    let header = send_file(&mut stream, path).await?;

    Ok(header)
}

/// Exchanges frames with whoever is paired with us on the relay, over a
/// single stream in both directions.
pub async fn relay_session(
    client: NetworkClient,
    relay: PeerId,
    output_dir: PathBuf,
    token: CancellationToken,
) {
    let stream = match client.open_stream(relay, RELAY_PROTOCOL).await {
        Ok(stream) => stream,
        Err(err) => {
            error!(%relay, "Failed to open relay stream: {err:?}");
            return;
        }
    };

    info!(%relay, "Relay stream open, waiting for the other side");

    let (reader, writer) = split(stream);
    let mut prompt = Prompt::spawn();

    let receiving = receive_from_relay(reader, &output_dir);
    let sending = send_to_relay(writer, &mut prompt);
    pin!(receiving, sending);

    // sending may finish first, receiving keeps going until the relay closes
    let mut sent_all = false;

    loop {
        select! {
            () = &mut receiving => break,
            () = &mut sending, if !sent_all => sent_all = true,
            () = token.cancelled() => break,
        }
    }

    info!(%relay, "Relay session ended");
}

async fn receive_from_relay<R>(reader: R, output_dir: &Path)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);

    match receive_frames(&mut reader, output_dir).await {
        Ok(count) => info!(count, "Relay closed the stream"),
        Err(err) => warn!(%err, "Relay stream failed"),
    }
}

async fn send_to_relay<W>(mut writer: W, prompt: &mut Prompt)
where
    W: AsyncWrite + Unpin,
{
    while let Some(path) = prompt.next_path().await {
        if let Err(err) = ensure_regular_file(&path).await {
            error!(path = %path.display(), "{err:?}");
            continue;
        }

        match offer_file(&mut writer, &path).await {
            Ok(header) => info!(
                filename = %header.filename,
                byte_length = header.byte_length,
                "File sent"
            ),
            Err(err) if err.is_recoverable() => warn!(path = %path.display(), %err, "File skipped"),
            Err(err) => {
                error!(path = %path.display(), %err, "Relay stream broken");
                return;
            }
        }
    }

    if let Err(err) = writer.shutdown().await {
        debug!(%err, "Failed to close relay stream");
    }
}

async fn ensure_regular_file(path: &Path) -> EyreResult<()> {
    let metadata = metadata(path)
        .await
        .wrap_err_with(|| format!("cannot read {}", path.display()))?;

    if !metadata.is_file() {
        bail!("{} is not a regular file", path.display());
    }

    Ok(())
}
