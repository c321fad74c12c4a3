use std::num::NonZeroUsize;

use serde::Deserialize;

/// How a run is divided among sessions.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Envelope sender and `From` address for every message
    pub sender: String,

    /// Messages per batch; each batch is handled by one worker
    ///
    /// Default: 50
    #[serde(default = "default_batch_size")]
    pub batch_size: NonZeroUsize,

    /// Upper bound on concurrently running workers, and so on open sessions
    ///
    /// Default: 10
    #[serde(default = "default_max_connections")]
    pub max_connections: NonZeroUsize,

    /// Successful sends after which a worker replaces its session
    ///
    /// Default: 100
    #[serde(default = "default_messages_per_connection")]
    pub messages_per_connection: NonZeroUsize,
}

impl DispatchConfig {
    #[must_use]
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            batch_size: default_batch_size(),
            max_connections: default_max_connections(),
            messages_per_connection: default_messages_per_connection(),
        }
    }
}

const fn non_zero(n: usize) -> NonZeroUsize {
    match NonZeroUsize::new(n) {
        Some(n) => n,
        None => NonZeroUsize::MIN,
    }
}

const fn default_batch_size() -> NonZeroUsize {
    non_zero(50)
}

const fn default_max_connections() -> NonZeroUsize {
    non_zero(10)
}

const fn default_messages_per_connection() -> NonZeroUsize {
    non_zero(100)
}
