use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Receives `(bytes on disk, total size or 0)` while a transfer runs.
///
/// Called from the transfer loop, so implementations must return quickly.
pub trait ProgressObserver: Send {
    fn on_progress(&mut self, transferred: u64, total: u64);
}

impl ProgressObserver for () {
    fn on_progress(&mut self, _transferred: u64, _total: u64) {}
}

impl ProgressObserver for ProgressBar {
    fn on_progress(&mut self, transferred: u64, total: u64) {
        if total > 0 && self.length() != Some(total) {
            self.set_length(total);
        }
        self.set_position(transferred);
    }
}

/// Bar drawn to stderr at a bounded refresh rate so rendering never holds up
/// the transfer loop.
pub fn transfer_bar(name: &str, hidden: bool) -> ProgressBar {
    let pb = ProgressBar::new(0);
    if hidden {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    } else {
        pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    }
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {eta:>4} {msg}")
        .map(|style| style.progress_chars("=>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(format!("Downloading {}", name));
    pb
}
