use tokio::sync::watch;

use super::types::{ConnectionQuality, ConnectionType, ConnectivityStatus, OperationKind};

/// Source of reachability information.
pub trait ConnectivityMonitor: Send + Sync {
    fn current(&self) -> ConnectivityStatus;

    /// Receiver that observes every change of status.
    fn subscribe(&self) -> watch::Receiver<ConnectivityStatus>;

    fn is_connected(&self) -> bool {
        self.current().is_connected
    }

    fn connection_type(&self) -> ConnectionType {
        self.current().connection_type
    }

    fn connection_quality(&self) -> ConnectionQuality {
        self.current().quality
    }

    fn should_attempt_operation(&self, kind: OperationKind) -> bool {
        self.current().allows(kind)
    }
}

/// Monitor fed by the host platform, which reports every reachability change.
pub struct ReportedConnectivityMonitor {
    tx: watch::Sender<ConnectivityStatus>,
}

impl ReportedConnectivityMonitor {
    pub fn new(initial: ConnectivityStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Publish a new status. Subscribers are only woken on an actual change.
    pub fn report(&self, status: ConnectivityStatus) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            log::info!(
                "Connectivity changed: connected={} type={:?} quality={:?}",
                status.is_connected, status.connection_type, status.quality
            );
        }
        changed
    }
}

impl Default for ReportedConnectivityMonitor {
    fn default() -> Self {
        Self::new(ConnectivityStatus::offline())
    }
}

impl ConnectivityMonitor for ReportedConnectivityMonitor {
    fn current(&self) -> ConnectivityStatus {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.tx.subscribe()
    }
}
