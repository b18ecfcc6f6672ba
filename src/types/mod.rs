//! Core types for the xlat coordinator.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (InterfaceName, SubscriptionId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for the daemon, service and logging

mod config;
mod errors;
mod ids;

pub use config::{ClatConfig, Config, DaemonConfig, ObservabilityConfig, ServiceConfig};
pub use errors::{Error, Result};
pub use ids::{InterfaceName, SubscriptionId, MAX_INTERFACE_NAME_LEN};
