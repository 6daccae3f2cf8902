use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};

use futures_util::{Stream as FuturesStream, StreamExt};
use libp2p::{PeerId, Stream as P2pStream, StreamProtocol};
use libp2p_stream::IncomingStreams;
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt};

/// Raw bytes, relayed verbatim between two paired peers.
pub const RELAY_PROTOCOL: StreamProtocol = StreamProtocol::new("/chat/1.0.0");

/// One framed file per stream.
pub const FILE_TRANSFER_PROTOCOL: StreamProtocol = StreamProtocol::new("/file-transfer/1.0.0");

/// A libp2p stream speaking tokio's `AsyncRead`/`AsyncWrite`.
pub type PeerStream = Compat<P2pStream>;

#[must_use]
pub fn into_peer_stream(stream: P2pStream) -> PeerStream {
    stream.compat()
}

/// Inbound streams accepted for a single protocol.
pub struct Incoming {
    protocol: StreamProtocol,
    inner: IncomingStreams,
}

impl Incoming {
    pub(crate) const fn new(protocol: StreamProtocol, inner: IncomingStreams) -> Self {
        Self { protocol, inner }
    }

    #[must_use]
    pub const fn protocol(&self) -> &StreamProtocol {
        &self.protocol
    }
}

impl fmt::Debug for Incoming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Incoming")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl FuturesStream for Incoming {
    type Item = (PeerId, PeerStream);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner
            .poll_next_unpin(cx)
            .map(|next| next.map(|(peer_id, stream)| (peer_id, into_peer_stream(stream))))
    }
}
