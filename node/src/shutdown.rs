//! Process-wide stop signal.
//!
//! The accept loop, the dispatcher and its dial tasks, peer readers and
//! writers, the message handler and the sync ticker all hold a receiver of
//! the same broadcast channel and unwind when it fires.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::signal;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct ShutdownController {
    tx: broadcast::Sender<()>,
    fired: Arc<AtomicBool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Sender half handed to the network layer, which subscribes per
    /// session.
    pub fn sender(&self) -> broadcast::Sender<()> {
        self.tx.clone()
    }

    /// Fire the signal. Only the first call broadcasts; returns whether
    /// this was it.
    pub fn shutdown(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        // No receivers just means nothing is running yet.
        let _ = self.tx.send(());
        true
    }
}

/// OS signal that asked the daemon to stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for StopSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Block until SIGINT or (on unix) SIGTERM arrives.
pub async fn wait_for_signal() -> io::Result<StopSignal> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result.map(|()| StopSignal::Interrupt),
            _ = terminate.recv() => Ok(StopSignal::Terminate),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok(StopSignal::Interrupt)
    }
}
