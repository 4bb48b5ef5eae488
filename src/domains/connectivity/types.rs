use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    None,
    Wifi,
    Cellular,
    Ethernet,
    Other,
}

/// Coarse link quality. Ordered so that `None < Low < Medium < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectionQuality {
    None,
    Low,
    Medium,
    High,
}

/// What kind of remote work is being considered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Attempted whenever there is any connection at all.
    Critical,
    Standard,
    /// Large uploads, deferred on poor links.
    PhotoUpload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityStatus {
    pub is_connected: bool,
    pub connection_type: ConnectionType,
    pub quality: ConnectionQuality,
}

impl ConnectivityStatus {
    pub fn offline() -> Self {
        Self {
            is_connected: false,
            connection_type: ConnectionType::None,
            quality: ConnectionQuality::None,
        }
    }

    pub fn online(connection_type: ConnectionType, quality: ConnectionQuality) -> Self {
        Self { is_connected: true, connection_type, quality }
    }

    pub fn allows(&self, kind: OperationKind) -> bool {
        if !self.is_connected {
            return false;
        }
        match kind {
            OperationKind::Critical => true,
            OperationKind::Standard => self.quality >= ConnectionQuality::Low,
            OperationKind::PhotoUpload => self.quality >= ConnectionQuality::Medium,
        }
    }
}

impl Default for ConnectivityStatus {
    fn default() -> Self {
        Self::offline()
    }
}
