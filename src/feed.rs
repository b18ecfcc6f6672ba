//! JSON-lines event feed.
//!
//! Lets an external monitor (or a shell pipe) drive the service. One record
//! per line:
//!
//! ```text
//! {"kind":"connectivity","connected":true,"interface":"rmnet0","protocol":"IPV6"}
//! {"kind":"interface_added","name":"clat"}
//! {"kind":"interface_removed","name":"clat"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::lifecycle::{AddressFamily, LinkProperties};
use crate::link::SharedLinkState;
use crate::service::XlatHandle;
use crate::types::{InterfaceName, Result};

/// One line of the feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedRecord {
    Connectivity {
        connected: bool,
        #[serde(default)]
        interface: Option<InterfaceName>,
        #[serde(default)]
        protocol: Option<String>,
    },
    InterfaceAdded {
        name: String,
    },
    InterfaceRemoved {
        name: String,
    },
}

impl FeedRecord {
    /// Parse one line; `Ok(None)` for blank and comment lines.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(line)?))
    }

    /// Update the link snapshot if needed and push the record to the service.
    pub async fn apply(self, link: &SharedLinkState, handle: &XlatHandle) -> Result<()> {
        match self {
            FeedRecord::Connectivity {
                connected: true,
                interface,
                protocol,
            } => {
                let address_family = protocol.as_deref().and_then(|label| {
                    let family = AddressFamily::from_protocol_type(label);
                    if family.is_none() {
                        tracing::debug!(protocol = label, "unrecognised protocol type");
                    }
                    family
                });
                link.set_connected(LinkProperties {
                    interface_name: interface,
                    address_family,
                })
                .await;
                handle.connectivity_changed().await?;
            }
            FeedRecord::Connectivity {
                connected: false, ..
            } => {
                link.set_disconnected().await;
                handle.connectivity_changed().await?;
            }
            FeedRecord::InterfaceAdded { name } => {
                handle.interface_added(&name).await?;
            }
            FeedRecord::InterfaceRemoved { name } => {
                handle.interface_removed(&name).await?;
            }
        }
        Ok(())
    }
}

/// Apply every record from `reader` until EOF.
///
/// Malformed lines are logged and skipped. Returns the number of records
/// applied.
pub async fn run_feed<R>(reader: R, link: &SharedLinkState, handle: &XlatHandle) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut applied = 0;
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        match FeedRecord::parse(&line) {
            Ok(Some(record)) => {
                record.apply(link, handle).await?;
                applied += 1;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(line = line_no, error = %e, "skipping malformed feed record"),
        }
    }

    Ok(applied)
}
