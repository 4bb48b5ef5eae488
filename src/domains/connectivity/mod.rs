pub mod monitor;
pub mod types;

pub use monitor::{ConnectivityMonitor, ReportedConnectivityMonitor};
pub use types::{ConnectionQuality, ConnectionType, ConnectivityStatus, OperationKind};
