//! Two-party rendezvous: the first two inbound streams are paired and
//! relayed to each other, everything else is turned away until that relay
//! is over.

pub mod bridge;
pub mod registry;

pub use bridge::{bridge, RelayConfig, RelayStats};
pub use registry::{Occupancy, PairingRegistry, Registration};
