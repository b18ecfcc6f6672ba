//! The 464xlat lifecycle state machine.
//!
//! Consumes [`ClatEvent`]s one at a time, looks each up in the static table
//! in [`ClatState::on`], and runs the entry action of every state it enters.
//! Entry actions may chain (`Starting → Stopped`, `Stopping → Stopped`)
//! within a single `dispatch`, so `Stopping` is never a resting state.
//!
//! NOT an actor itself - owned by the lifecycle worker and called via
//! `&mut self`, which serializes every dispatch.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::ports::{ConnectivitySource, DaemonControl, NotificationSink};
use super::types::{ClatEvent, ClatState, LifecycleStats, Reaction, StateChange, StateLabel};
use crate::types::{Error, InterfaceName, Result};

/// Default bound on a single external call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle state machine for one translation interface.
pub struct Nat464xlatMachine {
    connectivity: Arc<dyn ConnectivitySource>,
    daemon: Arc<dyn DaemonControl>,
    sink: Arc<dyn NotificationSink>,
    clat_interface: InterfaceName,
    call_timeout: Duration,
    state: ClatState,
    upstream: Option<InterfaceName>,
    stats: LifecycleStats,
}

impl fmt::Debug for Nat464xlatMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nat464xlatMachine")
            .field("clat_interface", &self.clat_interface)
            .field("call_timeout", &self.call_timeout)
            .field("state", &self.state)
            .field("upstream", &self.upstream)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Nat464xlatMachine {
    pub fn new(
        connectivity: Arc<dyn ConnectivitySource>,
        daemon: Arc<dyn DaemonControl>,
        sink: Arc<dyn NotificationSink>,
        clat_interface: InterfaceName,
    ) -> Self {
        Self {
            connectivity,
            daemon,
            sink,
            clat_interface,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            state: ClatState::Stopped,
            upstream: None,
            stats: LifecycleStats::default(),
        }
    }

    /// Bound every collaborator call made from an entry action.
    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Current state.
    pub fn state(&self) -> ClatState {
        self.state
    }

    /// Upstream interface recorded on entering `Starting`.
    pub fn upstream_interface(&self) -> Option<&InterfaceName> {
        self.upstream.as_ref()
    }

    pub fn clat_interface(&self) -> &InterfaceName {
        &self.clat_interface
    }

    pub fn stats(&self) -> &LifecycleStats {
        &self.stats
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Process one event and return the state the machine settles in.
    ///
    /// Never fails: collaborator errors are logged and the planned
    /// transition proceeds.
    pub async fn dispatch(&mut self, event: ClatEvent) -> ClatState {
        self.stats.events_processed += 1;

        match self.state.on(event) {
            Reaction::Enter(next) => {
                tracing::info!(from = %self.state, %event, to = %next, "clat_transition");
                self.transition_to(next).await;
            }
            Reaction::Ignore => {
                self.stats.events_ignored += 1;
                tracing::debug!(state = %self.state, %event, "event ignored");
            }
            Reaction::Unexpected(reason) => {
                self.stats.events_ignored += 1;
                tracing::warn!(state = %self.state, %event, "unexpected event ignored: {}", reason);
            }
        }

        self.state
    }

    async fn transition_to(&mut self, mut next: ClatState) {
        loop {
            self.state = next;
            match self.enter(next).await {
                Some(follow) => {
                    tracing::info!(from = %next, to = %follow, "clat_transition");
                    next = follow;
                }
                None => break,
            }
        }
    }

    /// Run the entry action of `state`; returns a same-tick follow-up state.
    async fn enter(&mut self, state: ClatState) -> Option<ClatState> {
        match state {
            ClatState::Stopped => {
                self.upstream = None;
                tracing::info!("transitioned to stopped");
                None
            }
            ClatState::Starting => self.enter_starting().await,
            ClatState::Running => {
                self.enter_running().await;
                None
            }
            ClatState::Stopping => {
                self.enter_stopping().await;
                Some(ClatState::Stopped)
            }
        }
    }

    async fn enter_starting(&mut self) -> Option<ClatState> {
        let query = bounded(
            self.call_timeout,
            "link properties query",
            self.connectivity.link_properties(),
        )
        .await;

        let props = match query {
            Ok(Some(props)) => props,
            Ok(None) => {
                tracing::error!("starting: no link properties for primary mobile attachment");
                return Some(ClatState::Stopped);
            }
            Err(e) => {
                tracing::error!(error = %e, "starting: link properties unavailable");
                return Some(ClatState::Stopped);
            }
        };

        if !props.address_family.is_some_and(|family| family.is_ipv6_only()) {
            tracing::debug!(
                protocol = ?props.address_family,
                "starting: upstream is not IPv6-only, skipping"
            );
            return Some(ClatState::Stopped);
        }

        let Some(iface) = props.interface_name else {
            tracing::error!("starting: IPv6-only upstream has no interface name");
            return Some(ClatState::Stopped);
        };

        tracing::info!(%iface, "starting clat");
        self.stats.daemon_starts += 1;
        if let Err(e) = bounded(self.call_timeout, "daemon start", self.daemon.start(&iface)).await {
            self.stats.daemon_failures += 1;
            tracing::error!(%iface, error = %e, "failed to start clat");
        }

        self.upstream = Some(iface);
        None
    }

    async fn enter_running(&mut self) {
        tracing::info!(clat = %self.clat_interface, "transitioned to running");
        self.announce(StateLabel::Running).await;
    }

    async fn enter_stopping(&mut self) {
        tracing::info!("stopping clat");
        self.stats.daemon_stops += 1;
        match bounded(self.call_timeout, "daemon stop", self.daemon.stop()).await {
            Ok(()) => tracing::debug!("clat stopped"),
            Err(e) => {
                self.stats.daemon_failures += 1;
                tracing::error!(error = %e, "failed to stop clat");
            }
        }

        self.announce(StateLabel::Stopping).await;
        self.upstream = None;
    }

    async fn announce(&mut self, label: StateLabel) {
        let Some(upstream) = self.upstream.clone() else {
            tracing::error!(state = %label, "no upstream interface recorded, notification dropped");
            return;
        };

        let change = StateChange::new(label, upstream, self.clat_interface.clone());
        match bounded(self.call_timeout, "state notification", self.sink.notify(&change)).await {
            Ok(()) => self.stats.notifications_sent += 1,
            Err(e) => {
                self.stats.notification_failures += 1;
                tracing::error!(state = %label, error = %e, "state notification failed");
            }
        }
    }
}

/// Await `fut`, failing with [`Error::Timeout`] after `limit`.
pub(crate) async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::timeout(format!("{} exceeded {:?}", what, limit)))?
}
