//! In-memory connectivity snapshot.
//!
//! Whatever watches the radio layer writes the latest attachment status
//! here; the lifecycle machine reads it back through [`ConnectivitySource`].

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::lifecycle::{ConnectivitySource, LinkProperties};
use crate::types::Result;

#[derive(Debug, Default, Clone)]
struct Snapshot {
    connected: bool,
    properties: Option<LinkProperties>,
}

/// Latest view of the primary mobile attachment.
#[derive(Debug, Default)]
pub struct SharedLinkState {
    inner: RwLock<Snapshot>,
}

impl SharedLinkState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connected attachment with its link properties.
    pub async fn set_connected(&self, properties: LinkProperties) {
        let mut inner = self.inner.write().await;
        inner.connected = true;
        inner.properties = Some(properties);
    }

    /// Record that the attachment went away.
    pub async fn set_disconnected(&self) {
        let mut inner = self.inner.write().await;
        inner.connected = false;
        inner.properties = None;
    }
}

#[async_trait]
impl ConnectivitySource for SharedLinkState {
    async fn primary_connected(&self) -> Result<bool> {
        Ok(self.inner.read().await.connected)
    }

    async fn link_properties(&self) -> Result<Option<LinkProperties>> {
        Ok(self.inner.read().await.properties.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::AddressFamily;

    #[tokio::test]
    async fn test_starts_disconnected() {
        let link = SharedLinkState::new();
        assert!(!link.primary_connected().await.unwrap());
        assert!(link.link_properties().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_connect_then_disconnect() {
        let link = SharedLinkState::new();
        let props = LinkProperties::new("rmnet0".parse().unwrap(), AddressFamily::Ipv6);

        link.set_connected(props.clone()).await;
        assert!(link.primary_connected().await.unwrap());
        assert_eq!(link.link_properties().await.unwrap(), Some(props));

        link.set_disconnected().await;
        assert!(!link.primary_connected().await.unwrap());
        assert!(link.link_properties().await.unwrap().is_none());
    }
}
