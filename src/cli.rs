use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::DownloadConfig;

/// Resumable single-file HTTP downloader.
///
/// Interrupt with Ctrl+C (or SIGTERM) to pause; run the same command again to
/// resume from the last confirmed byte.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// URL to download
    #[arg(index = 1)]
    pub url: String,

    /// Output file (discovered from the server or the URL when omitted)
    #[arg(index = 2)]
    pub output: Option<PathBuf>,

    /// State file used to pause and resume (defaults to <name>-state.json)
    #[arg(index = 3)]
    pub state: Option<PathBuf>,

    /// Seconds allowed for connecting and receiving response headers
    #[arg(long = "connect-timeout", default_value_t = 10)]
    pub connect_timeout: u64,

    /// Seconds the body may stall before the attempt fails (0 disables)
    #[arg(long = "read-timeout", default_value_t = 60)]
    pub read_timeout: u64,

    /// Milliseconds between state checkpoints while downloading
    #[arg(long = "checkpoint-interval", default_value_t = 1000)]
    pub checkpoint_interval: u64,

    /// Do not draw the progress bar
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl Args {
    pub fn config(&self) -> DownloadConfig {
        DownloadConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout),
            read_timeout: (self.read_timeout > 0).then(|| Duration::from_secs(self.read_timeout)),
            checkpoint_interval: Duration::from_millis(self.checkpoint_interval),
            ..DownloadConfig::default()
        }
    }
}
