//! Collaborator seams of the lifecycle machine.
//!
//! The machine only ever reads from a [`ConnectivitySource`] and writes to a
//! [`DaemonControl`] and a [`NotificationSink`]. How those are backed
//! (netlink, radio layer, broadcast bus) is the coordinator's business.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use super::types::{LinkProperties, StateChange};
use crate::types::{InterfaceName, Result};

/// Primary mobile attachment status.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// Whether the primary mobile attachment is connected.
    async fn primary_connected(&self) -> Result<bool>;

    /// Current link properties, `None` when there is no attachment.
    async fn link_properties(&self) -> Result<Option<LinkProperties>>;
}

/// Translation daemon start/stop surface.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DaemonControl: Send + Sync {
    async fn start(&self, upstream: &InterfaceName) -> Result<()>;

    async fn stop(&self) -> Result<()>;
}

/// Receiver of lifecycle-state-changed announcements.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, change: &StateChange) -> Result<()>;
}
