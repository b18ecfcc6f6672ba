//! Lifecycle service - single worker owning the state machine.
//!
//! Both signal sources push into one bounded, ordered queue; a single
//! spawned worker drains it and calls [`Nat464xlatMachine::dispatch`], so
//! dispatches never overlap. Callers hold a cloneable [`XlatHandle`].
//!
//! ```text
//!   connectivity changes ─┐
//!                         ├─▶ mpsc queue ─▶ worker ─▶ Nat464xlatMachine
//!   interface add/remove ─┘                   │
//!                                             └─▶ watch<ClatState>
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::{
    ClatEvent, ClatState, ConnectivitySource, DaemonControl, LifecycleStats, Nat464xlatMachine,
    NotificationSink,
};
use crate::lifecycle::machine::bounded;
use crate::types::{Config, Error, InterfaceName, Result};

/// Point-in-time view of the machine, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub state: ClatState,
    pub upstream_interface: Option<InterfaceName>,
    pub clat_interface: InterfaceName,
    pub stats: LifecycleStats,
}

#[derive(Debug)]
enum Request {
    Dispatch {
        event: ClatEvent,
        ack: Option<oneshot::Sender<ClatState>>,
    },
    Snapshot(oneshot::Sender<Snapshot>),
}

/// Cloneable front door to the lifecycle worker.
#[derive(Clone)]
pub struct XlatHandle {
    tx: mpsc::Sender<Request>,
    state_rx: watch::Receiver<ClatState>,
    connectivity: Arc<dyn ConnectivitySource>,
    clat_interface: InterfaceName,
    call_timeout: Duration,
    cancel: CancellationToken,
}

impl fmt::Debug for XlatHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XlatHandle")
            .field("clat_interface", &self.clat_interface)
            .field("state", &*self.state_rx.borrow())
            .finish_non_exhaustive()
    }
}

/// Build the machine from `config` and start its worker.
pub fn spawn_from_config(
    config: &Config,
    connectivity: Arc<dyn ConnectivitySource>,
    daemon: Arc<dyn DaemonControl>,
    sink: Arc<dyn NotificationSink>,
) -> Result<(XlatHandle, JoinHandle<LifecycleStats>)> {
    config.validate()?;
    let machine = Nat464xlatMachine::new(
        connectivity.clone(),
        daemon,
        sink,
        config.clat.interface()?,
    )
    .with_call_timeout(config.daemon.call_timeout);
    Ok(spawn(machine, connectivity, config.service.queue_capacity))
}

/// Start the worker. The returned task yields the final stats on exit.
///
/// `connectivity` must be the source the machine reads link properties from;
/// the handle queries it to classify connectivity changes.
pub fn spawn(
    machine: Nat464xlatMachine,
    connectivity: Arc<dyn ConnectivitySource>,
    queue_capacity: usize,
) -> (XlatHandle, JoinHandle<LifecycleStats>) {
    let (tx, rx) = mpsc::channel(queue_capacity.max(1));
    let (state_tx, state_rx) = watch::channel(machine.state());
    let cancel = CancellationToken::new();
    let clat_interface = machine.clat_interface().clone();
    let call_timeout = machine.call_timeout();

    let task = tokio::spawn(run(machine, rx, state_tx, cancel.clone()));

    let handle = XlatHandle {
        tx,
        state_rx,
        connectivity,
        clat_interface,
        call_timeout,
        cancel,
    };
    (handle, task)
}

async fn run(
    mut machine: Nat464xlatMachine,
    mut rx: mpsc::Receiver<Request>,
    state_tx: watch::Sender<ClatState>,
    cancel: CancellationToken,
) -> LifecycleStats {
    tracing::info!(clat = %machine.clat_interface(), "lifecycle worker started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // Refuse new work; whatever is already queued still runs in order.
                rx.close();
                break;
            }
            request = rx.recv() => match request {
                Some(request) => serve(&mut machine, &state_tx, request).await,
                None => break,
            }
        }
    }

    let mut drained = 0usize;
    while let Some(request) = rx.recv().await {
        serve(&mut machine, &state_tx, request).await;
        drained += 1;
    }
    if drained > 0 {
        tracing::debug!(drained, "drained queued requests on shutdown");
    }

    // Do not leave a daemon running behind a dead coordinator.
    if machine.state().holds_upstream() {
        tracing::info!(state = %machine.state(), "tearing down clat on shutdown");
        let settled = machine.dispatch(ClatEvent::UpstreamDown).await;
        state_tx.send_replace(settled);
    }

    tracing::info!("lifecycle worker stopped");
    machine.stats().clone()
}

async fn serve(
    machine: &mut Nat464xlatMachine,
    state_tx: &watch::Sender<ClatState>,
    request: Request,
) {
    match request {
        Request::Dispatch { event, ack } => {
            let settled = machine.dispatch(event).await;
            state_tx.send_replace(settled);
            if let Some(ack) = ack {
                let _ = ack.send(settled);
            }
        }
        Request::Snapshot(reply) => {
            let _ = reply.send(snapshot(machine));
        }
    }
}

fn snapshot(machine: &Nat464xlatMachine) -> Snapshot {
    Snapshot {
        state: machine.state(),
        upstream_interface: machine.upstream_interface().cloned(),
        clat_interface: machine.clat_interface().clone(),
        stats: machine.stats().clone(),
    }
}

impl XlatHandle {
    /// Enqueue an event without waiting for it to be processed.
    pub async fn send(&self, event: ClatEvent) -> Result<()> {
        self.tx
            .send(Request::Dispatch { event, ack: None })
            .await
            .map_err(|_| Error::channel_closed("lifecycle worker is gone"))
    }

    /// Enqueue an event and wait for the state the machine settles in.
    pub async fn dispatch(&self, event: ClatEvent) -> Result<ClatState> {
        let (ack, settled) = oneshot::channel();
        self.tx
            .send(Request::Dispatch {
                event,
                ack: Some(ack),
            })
            .await
            .map_err(|_| Error::channel_closed("lifecycle worker is gone"))?;
        settled
            .await
            .map_err(|_| Error::channel_closed("lifecycle worker dropped the event"))
    }

    /// The primary attachment changed; classify it and enqueue the result.
    pub async fn connectivity_changed(&self) -> Result<ClatEvent> {
        let query = bounded(
            self.call_timeout,
            "connectivity query",
            self.connectivity.primary_connected(),
        );
        let event = match query.await {
            Ok(true) => ClatEvent::UpstreamUp,
            Ok(false) => ClatEvent::UpstreamDown,
            Err(e) => {
                tracing::warn!(error = %e, "connectivity query failed, treating as down");
                ClatEvent::UpstreamDown
            }
        };
        self.send(event).await?;
        Ok(event)
    }

    /// An OS interface appeared. Returns whether it was the translation
    /// interface (and so was enqueued).
    pub async fn interface_added(&self, iface: &str) -> Result<bool> {
        self.interface_event(iface, ClatEvent::ClatUp).await
    }

    /// An OS interface disappeared. Returns whether it was the translation
    /// interface.
    pub async fn interface_removed(&self, iface: &str) -> Result<bool> {
        self.interface_event(iface, ClatEvent::ClatDown).await
    }

    async fn interface_event(&self, iface: &str, event: ClatEvent) -> Result<bool> {
        if self.clat_interface != iface {
            tracing::trace!(%iface, "ignoring unrelated interface");
            return Ok(false);
        }
        self.send(event).await?;
        Ok(true)
    }

    /// Last settled state.
    pub fn state(&self) -> ClatState {
        *self.state_rx.borrow()
    }

    /// Receiver notified after every processed event.
    pub fn watch_state(&self) -> watch::Receiver<ClatState> {
        self.state_rx.clone()
    }

    pub fn clat_interface(&self) -> &InterfaceName {
        &self.clat_interface
    }

    /// Current state, upstream and counters, read in queue order.
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Snapshot(reply))
            .await
            .map_err(|_| Error::channel_closed("lifecycle worker is gone"))?;
        rx.await
            .map_err(|_| Error::channel_closed("lifecycle worker dropped the request"))
    }

    /// Stop the worker.
    ///
    /// Requests already queued are still processed in order; later sends
    /// fail with [`Error::ChannelClosed`]. A live clat is torn down last.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{AddressFamily, LinkProperties, StateChange};
    use crate::link::SharedLinkState;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Counter {
        starts: AtomicUsize,
        stops: AtomicUsize,
        notes: AtomicUsize,
    }

    #[async_trait]
    impl DaemonControl for Counter {
        async fn start(&self, _upstream: &InterfaceName) -> Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl NotificationSink for Counter {
        async fn notify(&self, _change: &StateChange) -> Result<()> {
            self.notes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn service() -> (XlatHandle, JoinHandle<LifecycleStats>, Arc<SharedLinkState>, Arc<Counter>) {
        let link = Arc::new(SharedLinkState::new());
        let counter = Arc::new(Counter::default());
        let (handle, task) = spawn_from_config(
            &Config::default(),
            link.clone(),
            counter.clone(),
            counter.clone(),
        )
        .unwrap();
        (handle, task, link, counter)
    }

    async fn connect_ipv6(link: &SharedLinkState) {
        link.set_connected(LinkProperties::new(
            "rmnet0".parse().unwrap(),
            AddressFamily::Ipv6,
        ))
        .await;
    }

    #[tokio::test]
    async fn test_dispatch_acks_settled_state() {
        let (handle, _task, link, counter) = service().await;
        connect_ipv6(&link).await;

        assert_eq!(handle.dispatch(ClatEvent::UpstreamUp).await.unwrap(), ClatState::Starting);
        assert_eq!(handle.dispatch(ClatEvent::ClatUp).await.unwrap(), ClatState::Running);
        assert_eq!(handle.state(), ClatState::Running);
        assert_eq!(counter.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counter.notes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connectivity_changed_classifies_events() {
        let (handle, _task, link, _counter) = service().await;

        assert_eq!(handle.connectivity_changed().await.unwrap(), ClatEvent::UpstreamDown);
        connect_ipv6(&link).await;
        assert_eq!(handle.connectivity_changed().await.unwrap(), ClatEvent::UpstreamUp);

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.state, ClatState::Starting);
        assert_eq!(snap.upstream_interface.unwrap(), "rmnet0");
        assert_eq!(snap.stats.events_processed, 2);
    }

    #[tokio::test]
    async fn test_unrelated_interfaces_are_filtered() {
        let (handle, _task, _link, _counter) = service().await;

        assert!(!handle.interface_added("wlan0").await.unwrap());
        assert!(!handle.interface_removed("rmnet0").await.unwrap());
        assert!(handle.interface_added("clat").await.unwrap());

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.stats.events_processed, 1);
        assert_eq!(snap.state, ClatState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_tears_down_running_clat() {
        let (handle, task, link, counter) = service().await;
        connect_ipv6(&link).await;
        handle.dispatch(ClatEvent::UpstreamUp).await.unwrap();
        handle.dispatch(ClatEvent::ClatUp).await.unwrap();

        handle.shutdown();
        let stats = task.await.unwrap();

        assert_eq!(counter.stops.load(Ordering::SeqCst), 1);
        assert_eq!(counter.notes.load(Ordering::SeqCst), 2);
        assert_eq!(stats.daemon_stops, 1);
        assert_eq!(handle.state(), ClatState::Stopped);
        assert!(matches!(
            handle.send(ClatEvent::UpstreamUp).await,
            Err(Error::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_watch_state_sees_transitions() {
        let (handle, _task, link, _counter) = service().await;
        connect_ipv6(&link).await;
        let mut watcher = handle.watch_state();

        handle.send(ClatEvent::UpstreamUp).await.unwrap();
        watcher.changed().await.unwrap();
        assert_eq!(*watcher.borrow_and_update(), ClatState::Starting);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_events() {
        let (handle, task, link, counter) = service().await;
        connect_ipv6(&link).await;

        handle.send(ClatEvent::UpstreamUp).await.unwrap();
        handle.send(ClatEvent::ClatUp).await.unwrap();
        handle.send(ClatEvent::ClatUp).await.unwrap();
        handle.shutdown();
        let stats = task.await.unwrap();

        // Three queued events plus the teardown dispatch.
        assert_eq!(stats.events_processed, 4);
        assert_eq!(stats.events_ignored, 1);
        assert_eq!(counter.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counter.stops.load(Ordering::SeqCst), 1);
        assert_eq!(counter.notes.load(Ordering::SeqCst), 2);
        assert!(handle.send(ClatEvent::UpstreamDown).await.is_err());
    }

    /// Connectivity source whose queries never complete.
    #[derive(Debug)]
    struct Unresponsive;

    #[async_trait]
    impl ConnectivitySource for Unresponsive {
        async fn primary_connected(&self) -> Result<bool> {
            std::future::pending::<Result<bool>>().await
        }

        async fn link_properties(&self) -> Result<Option<LinkProperties>> {
            std::future::pending::<Result<Option<LinkProperties>>>().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_connectivity_query_counts_as_down() {
        let link: Arc<dyn ConnectivitySource> = Arc::new(Unresponsive);
        let counter = Arc::new(Counter::default());
        let machine = Nat464xlatMachine::new(
            link.clone(),
            counter.clone(),
            counter.clone(),
            "clat".parse().unwrap(),
        )
        .with_call_timeout(Duration::from_secs(1));
        let (handle, _task) = spawn(machine, link, 8);

        assert_eq!(handle.connectivity_changed().await.unwrap(), ClatEvent::UpstreamDown);

        let snap = handle.snapshot().await.unwrap();
        assert_eq!(snap.state, ClatState::Stopped);
        assert_eq!(snap.stats.events_processed, 1);
        assert_eq!(counter.starts.load(Ordering::SeqCst), 0);
    }
}
