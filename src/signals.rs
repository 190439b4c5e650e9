//! Turns SIGINT/SIGTERM into a cancellation request.
//!
//! The handler never touches transfer state. It records which signal arrived
//! and cancels the token; the engine stops at its next chunk boundary and
//! saves. A second signal exits the process immediately.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[cfg(unix)]
use nix::sys::signal::Signal;

#[cfg(unix)]
pub const SIGINT: i32 = Signal::SIGINT as i32;
#[cfg(unix)]
pub const SIGTERM: i32 = Signal::SIGTERM as i32;

#[cfg(not(unix))]
pub const SIGINT: i32 = 2;
#[cfg(not(unix))]
pub const SIGTERM: i32 = 15;

/// Handle on the interruption listener.
#[derive(Clone)]
pub struct Interrupt {
    token: CancellationToken,
    received: Arc<AtomicI32>,
}

impl Interrupt {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            received: Arc::new(AtomicI32::new(0)),
        }
    }

    /// Spawns the listener. Must be called inside a Tokio runtime.
    ///
    /// The first signal requests a pause. A second one exits with its signal
    /// number without waiting for the engine.
    pub fn install(token: CancellationToken) -> std::io::Result<Self> {
        let interrupt = Self::new(token);
        let listener = interrupt.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;
            tokio::spawn(async move {
                loop {
                    let signum = tokio::select! {
                        Some(()) = sigint.recv() => SIGINT,
                        Some(()) = sigterm.recv() => SIGTERM,
                        else => break,
                    };
                    if !listener.trigger(signum) {
                        force_exit(signum);
                    }
                }
            });
        }

        #[cfg(not(unix))]
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !listener.trigger(SIGINT) {
                    force_exit(SIGINT);
                }
            }
        });

        Ok(interrupt)
    }

    /// Records `signum` and requests cancellation. Returns `false` when a
    /// signal had already been received; the first one is kept.
    pub fn trigger(&self, signum: i32) -> bool {
        let first = self
            .received
            .compare_exchange(0, signum, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if first {
            warn!(signal = signum, "Interrupt signal received, pausing download");
        }
        self.token.cancel();
        first
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Signal number that triggered cancellation, if any.
    pub fn signal(&self) -> Option<i32> {
        match self.received.load(Ordering::SeqCst) {
            0 => None,
            signum => Some(signum),
        }
    }
}

fn force_exit(signum: i32) -> ! {
    warn!(signal = signum, "Second interrupt received, exiting without waiting");
    std::process::exit(signum);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_signal_wins_and_cancels() {
        let interrupt = Interrupt::new(CancellationToken::new());
        assert_eq!(interrupt.signal(), None);

        assert!(interrupt.trigger(SIGTERM));
        assert!(!interrupt.trigger(SIGINT));

        assert_eq!(interrupt.signal(), Some(SIGTERM));
        assert!(interrupt.token().is_cancelled());
    }

    #[cfg(unix)]
    #[test]
    fn signal_numbers_match_the_platform() {
        assert_eq!(SIGINT, 2);
        assert_eq!(SIGTERM, 15);
    }
}
