use core::{fmt, mem};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::bridge::{bridge, RelayConfig, RelayStats};

/// What the registry did with an inbound stream.
#[derive(Debug)]
pub enum Registration {
    /// First of a pair, parked until the second one shows up.
    Waiting { cycle: u64 },
    /// Second of a pair. The relay runs on its own task.
    Paired {
        cycle: u64,
        relay: JoinHandle<RelayStats>,
    },
    /// A relay was already running. The stream has been closed.
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Occupancy {
    Empty,
    Waiting,
    Relaying,
}

enum Slot<S> {
    Empty,
    Waiting(S),
    Relaying,
}

struct SlotState<S> {
    slot: Slot<S>,
    cycle: u64,
}

struct Inner<S> {
    state: Mutex<SlotState<S>>,
    config: RelayConfig,
    token: CancellationToken,
    tracker: TaskTracker,
}

/// Pairs the first two inbound streams and relays them to each other.
///
/// Streams arriving while a relay is in progress are closed. Once the relay
/// completes the registry is empty again and the next stream starts a new
/// cycle.
pub struct PairingRegistry<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for PairingRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> fmt::Debug for PairingRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();

        f.debug_struct("PairingRegistry")
            .field("occupancy", &state.slot.occupancy())
            .field("cycle", &state.cycle)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

enum Decision<S> {
    Waiting(u64),
    Paired(u64, S, S),
    Rejected(S),
}

impl<S> Slot<S> {
    const fn occupancy(&self) -> Occupancy {
        match self {
            Self::Empty => Occupancy::Empty,
            Self::Waiting(_) => Occupancy::Waiting,
            Self::Relaying => Occupancy::Relaying,
        }
    }
}

impl<S> PairingRegistry<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self::with_token(config, CancellationToken::new())
    }

    /// Relays started by this registry stop when `token` is cancelled.
    #[must_use]
    pub fn with_token(config: RelayConfig, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SlotState {
                    slot: Slot::Empty,
                    cycle: 0,
                }),
                config,
                token,
                tracker: TaskTracker::new(),
            }),
        }
    }

    #[must_use]
    pub fn occupancy(&self) -> Occupancy {
        self.inner.state.lock().slot.occupancy()
    }

    /// Registers a stream in arrival order.
    ///
    /// Callers must await each registration before submitting the next
    /// stream, otherwise "first" and "second" are whatever the scheduler
    /// makes of them.
    pub async fn on_inbound_stream(&self, stream: S) -> Registration {
        let decision = {
            let mut state = self.inner.state.lock();
            let cycle = state.cycle;

            match mem::replace(&mut state.slot, Slot::Relaying) {
                Slot::Empty => {
                    state.slot = Slot::Waiting(stream);
                    Decision::Waiting(cycle)
                }
                Slot::Waiting(first) => Decision::Paired(cycle, first, stream),
                Slot::Relaying => Decision::Rejected(stream),
            }
        };

        match decision {
            Decision::Waiting(cycle) => {
                info!(cycle, "First stream registered, waiting for a peer");

                Registration::Waiting { cycle }
            }
            Decision::Paired(cycle, first, second) => {
                info!(cycle, "Second stream registered, relaying");

                let relay = self.spawn_relay(cycle, first, second);

                Registration::Paired { cycle, relay }
            }
            Decision::Rejected(mut stream) => {
                warn!("Relay already in progress, closing extra stream");

                if let Err(err) = stream.shutdown().await {
                    debug!(%err, "Failed to close rejected stream");
                }

                Registration::Rejected
            }
        }
    }

    /// Stops every relay, drops a parked stream and waits for the relay
    /// tasks to finish.
    pub async fn shutdown(&self) {
        self.inner.token.cancel();

        let parked = {
            let mut state = self.inner.state.lock();

            match mem::replace(&mut state.slot, Slot::Empty) {
                Slot::Waiting(stream) => Some(stream),
                Slot::Relaying => {
                    state.slot = Slot::Relaying;
                    None
                }
                Slot::Empty => None,
            }
        };

        drop(parked);

        let _closed = self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    fn spawn_relay(&self, cycle: u64, first: S, second: S) -> JoinHandle<RelayStats> {
        let registry = self.clone();
        let config = self.inner.config;
        let token = self.inner.token.clone();

        self.inner.tracker.spawn(async move {
            let stats = bridge(first, second, config, token).await;

            info!(
                cycle,
                a_to_b = stats.a_to_b,
                b_to_a = stats.b_to_a,
                cancelled = stats.cancelled,
                "Relay finished"
            );

            registry.release(cycle);

            stats
        })
    }

    fn release(&self, cycle: u64) {
        let mut state = self.inner.state.lock();

        if state.cycle != cycle {
            return;
        }

        state.slot = Slot::Empty;
        state.cycle = state.cycle.wrapping_add(1);
    }
}
