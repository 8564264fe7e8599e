//! Signal handling
//!
//! Termination signals are recorded in a [`RunContext`]; whoever owns the
//! work (the loader) watches the context and winds down.

use std::io;
use std::sync::Arc;
use tokio::sync::watch;

/// SIGINT
pub const SIGINT: i32 = 2;
/// SIGQUIT
pub const SIGQUIT: i32 = 3;
/// SIGTERM
pub const SIGTERM: i32 = 15;

/// Cancellation state of one run, shared by cloning
#[derive(Debug, Clone)]
pub struct RunContext {
    signal: Arc<watch::Sender<Option<i32>>>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Creates a context that has not been killed
    #[must_use]
    pub fn new() -> Self {
        let (signal, _) = watch::channel(None);
        Self {
            signal: Arc::new(signal),
        }
    }

    /// Records that the run was killed by `signum`. The first signal wins.
    pub fn kill(&self, signum: i32) {
        self.signal.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(signum);
            true
        });
    }

    /// Signal that killed the run, if any
    #[must_use]
    pub fn received_signal(&self) -> Option<i32> {
        *self.signal.borrow()
    }

    /// Returns true once killed
    #[must_use]
    pub fn is_killed(&self) -> bool {
        self.received_signal().is_some()
    }

    /// Resolves with the signal number once the run is killed
    pub async fn killed(&self) -> i32 {
        let mut rx = self.signal.subscribe();
        let signum = rx.wait_for(Option::is_some).await.ok().and_then(|s| *s);
        match signum {
            Some(signum) => signum,
            // The sender lives as long as `self`, so the wait cannot fail.
            None => std::future::pending().await,
        }
    }
}

/// Spawns listeners that record SIGINT, SIGTERM and SIGQUIT in `ctx`.
/// SIGHUP is ignored.
///
/// # Errors
///
/// Returns an error if a handler cannot be registered.
#[cfg(unix)]
pub fn install_signal_handlers(ctx: &RunContext) -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let handled = [
        (SignalKind::interrupt(), SIGINT),
        (SignalKind::terminate(), SIGTERM),
        (SignalKind::quit(), SIGQUIT),
    ];
    for (kind, signum) in handled {
        let mut stream = signal(kind)?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                tracing::info!("received signal {}", signum);
                ctx.kill(signum);
            }
        });
    }

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::debug!("ignoring SIGHUP");
        }
    });
    Ok(())
}

/// Spawns a Ctrl-C listener that records SIGINT in `ctx`.
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub fn install_signal_handlers(ctx: &RunContext) -> io::Result<()> {
    let ctx = ctx.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received signal {}", SIGINT);
            ctx.kill(SIGINT);
        }
    });
    Ok(())
}
