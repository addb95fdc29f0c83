//! Engine configuration, kept separate from the wire-protocol constants in
//! [`crate::frame`] and [`crate::elm`].

/// Tunable timeouts and the default CAN bit rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    /// Bounds the entire request/response exchange.
    pub request_timeout_ms: u64,
    /// Bounds the wait between consecutive frames during multi-frame RX,
    /// after which a flow-control frame is re-emitted.
    pub consecutive_frame_timeout_ms: u64,
    /// Default CAN bit rate used by [`crate::engine::Engine::begin`].
    pub baudrate: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 1000,
            consecutive_frame_timeout_ms: 100,
            baudrate: 500_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.request_timeout_ms, 1000);
        assert_eq!(config.consecutive_frame_timeout_ms, 100);
        assert_eq!(config.baudrate, 500_000);
    }
}
