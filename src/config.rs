use std::time::Duration;

/// Tunables for one download run.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Bound on connecting and receiving the response head.
    pub connect_timeout: Duration,
    /// Longest allowed stall between body chunks. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Minimum spacing between state saves while bytes are flowing.
    pub checkpoint_interval: Duration,
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Some(Duration::from_secs(60)),
            checkpoint_interval: Duration::from_secs(1),
            user_agent: format!("resumer/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}
