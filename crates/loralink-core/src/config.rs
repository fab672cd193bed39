//! Station configuration

use serde::{Deserialize, Serialize};

/// Tunables for the reliable-delivery state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// How long to listen for an acknowledgement before counting a miss (ms)
    pub ack_timeout_ms: u32,
    /// Consecutive ACK-wait misses before the whole send cycle restarts
    pub max_ack_tries: u8,
    /// Upper bound on full send cycles; `None` retries until acknowledged
    pub max_send_attempts: Option<u32>,
    /// Random pre-transmit delay range to reduce collisions on the shared
    /// channel (ms, inclusive upper bound 0 disables jitter)
    pub jitter_max_ms: u32,
    /// Pause before acknowledging, giving the sender time to enter its
    /// listen window (ms)
    pub ack_delay_ms: u32,
    /// Seed for the jitter generator; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: 500,
            max_ack_tries: 5,
            max_send_attempts: None,
            jitter_max_ms: 500,
            ack_delay_ms: 50,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();
        assert_eq!(config.ack_timeout_ms, 500);
        assert_eq!(config.max_ack_tries, 5);
        assert!(config.max_send_attempts.is_none());
    }
}
