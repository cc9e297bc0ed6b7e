use super::{ShutdownReason, TreelightOrchestrator};
use crate::error::{Result, TreelightError};
use crate::events::{EventFilter, EventReceiver, TreelightEvent};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info};

impl TreelightOrchestrator {
    /// Run until a signal or a shutdown request arrives, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        info!("Treelight system is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| TreelightError::system("Shutdown sender already taken"))?;
        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| TreelightError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers(shutdown_sender);

        let mut requests = EventReceiver::new(
            self.event_bus.subscribe(),
            EventFilter::EventTypes(vec!["shutdown_requested"]),
            "shutdown".to_string(),
        );

        let shutdown_reason = tokio::select! {
            reason = shutdown_receiver => reason
                .map_err(|_| TreelightError::system("Shutdown channel closed unexpectedly"))?,
            request = requests.recv() => match request {
                Ok(TreelightEvent::ShutdownRequested { reason, .. }) => ShutdownReason::UserRequest(reason),
                Ok(other) => ShutdownReason::Error(format!("unexpected event {}", other.event_type())),
                Err(e) => ShutdownReason::Error(e.to_string()),
            },
        };

        info!("Shutdown initiated: {:?}", shutdown_reason);
        let mut exit_code = self.shutdown().await?;
        if matches!(shutdown_reason, ShutdownReason::Error(_)) {
            exit_code = 1;
        }

        info!("Treelight system shutdown complete");
        Ok(exit_code)
    }

    /// SIGTERM (systemd stop) and SIGINT both end the run
    fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::spawn(async move {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                                let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                            }
                        }
                    });
                }
                Err(e) => error!("Failed to register SIGTERM handler: {}", e),
            }
        }

        let shutdown_sender_sigint = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender_sigint.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
