//! Lifecycle - the NAT64/CLAT state machine and its collaborator seams.
//!
//! The machine owns the lifecycle state and the recorded upstream interface.
//! Everything outside it (link monitoring, interface events, the daemon,
//! announcements) is reached through the traits in [`ports`].

pub mod machine;
pub mod ports;
pub mod types;

pub use machine::{Nat464xlatMachine, DEFAULT_CALL_TIMEOUT};
pub use ports::{ConnectivitySource, DaemonControl, NotificationSink};
pub use types::{
    AddressFamily, ClatEvent, ClatState, LifecycleStats, LinkProperties, Reaction, StateChange,
    StateLabel,
};
