//! Edge transport configuration for the lobby socket.

use serde::{Deserialize, Serialize};

use super::defaults::{
    default_identify_timeout_secs, default_max_message_size, default_max_messages_per_second,
    default_outbound_queue_capacity,
};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebSocketConfig {
    /// Per-connection inbound message ceiling (cheap abuse guard).
    #[serde(default = "default_max_messages_per_second")]
    pub max_messages_per_second: u32,
    /// Bounded capacity of each connection's outbound queue.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
    /// Maximum accepted inbound frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// How long a fresh connection may idle before its `USER.IDENTIFY`.
    #[serde(default = "default_identify_timeout_secs")]
    pub identify_timeout_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_messages_per_second: default_max_messages_per_second(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
            max_message_size: default_max_message_size(),
            identify_timeout_secs: default_identify_timeout_secs(),
        }
    }
}
