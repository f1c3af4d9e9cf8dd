//! Process-level supervision of the connection controller.
//!
//! The supervisor owns the shutdown channel and the restart budget. Each run
//! gets a fresh controller from a factory; a run that fails for any reason
//! other than a fatal error is restarted after a backoff delay.

use std::future::Future;

use tokio::sync::watch;
use tracing::{error, info, warn};

use tether_core::BackoffPolicy;

use crate::controller::Outcome;
use crate::error::Result;
use crate::settings::Settings;

/// How the process should exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Graceful shutdown.
    Stopped,
    /// The session was logged out.
    LoggedOut,
    /// Fatal error, or the restart budget is spent.
    Failed,
}

impl ExitStatus {
    /// Process exit code.
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Stopped => 0,
            ExitStatus::Failed => 1,
            ExitStatus::LoggedOut => 3,
        }
    }
}

/// Runs controllers until one finishes for good.
pub struct Supervisor {
    max_restarts: u32,
    backoff: BackoffPolicy,
    shutdown: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new(max_restarts: u32, backoff: BackoffPolicy) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            max_restarts,
            backoff,
            shutdown,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.max_restarts, settings.restart_backoff)
    }

    /// Ask the running controller to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Run controllers built by `factory` until one stops, logs out, fails
    /// fatally, or `signal` completes.
    ///
    /// `factory` receives the shutdown receiver each controller must honor.
    pub async fn run<F, Fut, Sig>(&self, mut factory: F, signal: Sig) -> ExitStatus
    where
        F: FnMut(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = Result<Outcome>> + Send + 'static,
        Sig: Future<Output = ()>,
    {
        tokio::pin!(signal);
        let mut restarts = 0u32;

        loop {
            let mut task = tokio::spawn(factory(self.shutdown.subscribe()));

            let joined = tokio::select! {
                joined = &mut task => joined,
                _ = &mut signal => {
                    info!("shutdown signal received");
                    self.shutdown();
                    match task.await {
                        Ok(Ok(outcome)) => info!(?outcome, "controller stopped"),
                        Ok(Err(e)) => warn!(error = %e, "controller failed during shutdown"),
                        Err(e) => warn!(error = %e, "controller task aborted during shutdown"),
                    }
                    return ExitStatus::Stopped;
                }
            };

            match joined {
                Ok(Ok(Outcome::Stopped)) => {
                    info!("controller stopped");
                    return ExitStatus::Stopped;
                }
                Ok(Ok(Outcome::LoggedOut)) => {
                    warn!("session logged out; exiting");
                    return ExitStatus::LoggedOut;
                }
                Ok(Err(e)) if e.is_fatal() => {
                    error!(error = %e, "controller failed fatally");
                    return ExitStatus::Failed;
                }
                Ok(Err(e)) => error!(error = %e, "controller failed"),
                Err(e) => error!(error = %e, "controller task panicked"),
            }

            if restarts >= self.max_restarts {
                error!(restarts, "restart budget spent");
                return ExitStatus::Failed;
            }
            restarts += 1;
            let delay = self.backoff.delay(restarts);
            info!(
                restart = restarts,
                max = self.max_restarts,
                delay_ms = delay.as_millis() as u64,
                "restarting controller"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut signal => {
                    info!("shutdown signal received while restarting");
                    return ExitStatus::Stopped;
                }
            }
        }
    }
}

/// Completes on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
