//! Termination signal handling for SIGTERM and SIGINT.
//!
//! A signal cancels the run's token. The running operation stops its subprocess
//! and returns, after which the run context removes partial output.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Which signal ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl ShutdownSignal {
    /// Conventional shell exit status (128 + signal number)
    pub fn exit_code(self) -> i32 {
        match self {
            ShutdownSignal::Interrupt => 130,
            ShutdownSignal::Terminate => 143,
        }
    }
}

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Wait for SIGINT or SIGTERM, then cancel the run
    pub async fn wait_for_signal(&self) -> ShutdownSignal {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let received = tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), stopping current operation...");
                ShutdownSignal::Interrupt
            }
            _ = terminate => {
                info!("Received SIGTERM, stopping current operation...");
                ShutdownSignal::Terminate
            }
        };

        self.token.cancel();
        received
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ShutdownSignal::Interrupt.exit_code(), 130);
        assert_eq!(ShutdownSignal::Terminate.exit_code(), 143);
    }

    #[tokio::test]
    async fn test_cancellation_reaches_subscribers() {
        let token = CancellationToken::new();
        let _coordinator = ShutdownCoordinator::new(token.clone());
        let child = token.child_token();

        let handle = tokio::spawn(async move {
            child.cancelled().await;
        });

        token.cancel();
        handle.await.unwrap();
    }
}
