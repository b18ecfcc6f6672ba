//! # Xlat Core - NAT64/CLAT Interface Lifecycle Coordinator
//!
//! Decides when a 464xlat translation daemon should run, from two
//! independent event sources:
//! - the primary mobile attachment going up/down (and whether it is
//!   IPv6-only)
//! - the translation interface appearing/disappearing at the OS level
//!
//! ## Architecture
//!
//! A single worker owns the state machine; both sources feed one queue:
//! ```text
//!                      ┌──────────────────────────────────┐
//!   link changes    →  │        Lifecycle Worker          │  → DaemonControl
//!   iface add/remove → │  ┌────────────────────────────┐  │     (start/stop)
//!                      │  │ STOPPED → STARTING →       │  │
//!                      │  │   RUNNING → STOPPING       │  │  → NotificationSink
//!                      │  └────────────────────────────┘  │     (CommBus)
//!                      └──────────────────────────────────┘
//! ```

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

pub mod commbus;
pub mod daemon;
pub mod feed;
pub mod lifecycle;
pub mod link;
pub mod service;
pub mod types;

// Internal utilities
pub mod observability;

pub use lifecycle::{ClatEvent, ClatState, Nat464xlatMachine};
pub use service::{spawn, spawn_from_config, Snapshot, XlatHandle};
pub use types::{Config, Error, Result};
