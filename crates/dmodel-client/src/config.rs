use serde::{Deserialize, Serialize};

/// Sizing of the client's queues.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Capacity of the outbound and inbound envelope queues.
    pub outbound_capacity: usize,
    /// Capacity of the broadcast channel carrying change notifications.
    pub notification_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            notification_capacity: 256,
        }
    }
}
