use tlj_frame::FrameConfig;

/// Capacity of the failed-connection queue unless configured otherwise.
pub const DEFAULT_FAILED_QUEUE_CAPACITY: usize = 200;

/// What happens to a pending request once an answer has been dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingPolicy {
    /// Keep the entry; later answers with the same id fire the callbacks
    /// again. Entries are only replaced when the 16-bit id wraps around.
    #[default]
    Retain,
    /// Remove the entry after the first answer that reached a callback.
    EvictOnDispatch,
}

/// Client behavior configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Limits and timeouts for the connection's frame I/O.
    pub frame: FrameConfig,
    pub pending_policy: PendingPolicy,
}

/// Server behavior configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Limits and timeouts applied to every accepted connection.
    pub frame: FrameConfig,
    /// Bound of the failed-connection queue. When full, the oldest entry is
    /// dropped to make room.
    pub failed_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            failed_queue_capacity: DEFAULT_FAILED_QUEUE_CAPACITY,
        }
    }
}
