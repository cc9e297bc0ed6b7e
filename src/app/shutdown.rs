use super::{ComponentState, TreelightOrchestrator};
use crate::error::{Result, TreelightError};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const KEYBOARD_STOP_TIMEOUT: Duration = Duration::from_secs(2);

impl TreelightOrchestrator {
    /// Cancel every task, wait for them with timeouts and leave the lights off
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");
        self.cancellation_token.cancel();

        let mut exit_code = 0;

        // Reverse start order; the session closes its open visit before lights go down
        for component in ["keyboard", "detector", "session", "lights"] {
            if let Err(e) = self.stop_component(component).await {
                error!("Error stopping {}: {}", component, e);
                exit_code = 1;
            }
        }

        if let Some(lights) = &self.lights {
            lights.reset().await;
        }
        self.hub.close();
        self.log_statistics();

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_component(&mut self, component: &'static str) -> Result<()> {
        if self.get_component_state(component).await.is_none() {
            return Ok(());
        }

        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        let result = if component == "keyboard" {
            self.stop_keyboard().await
        } else {
            self.join_tasks(component).await
        };

        let state = match &result {
            Ok(()) => {
                info!("{} component stopped", component);
                ComponentState::Stopped
            }
            Err(_) => ComponentState::Failed,
        };
        self.set_component_state(component, state).await;
        result
    }

    async fn stop_keyboard(&self) -> Result<()> {
        let Some(keyboard_handler) = &self.keyboard_handler else {
            return Ok(());
        };
        match timeout(KEYBOARD_STOP_TIMEOUT, keyboard_handler.stop()).await {
            Ok(result) => result,
            Err(_) => Err(stop_timeout("keyboard")),
        }
    }

    async fn join_tasks(&mut self, component: &'static str) -> Result<()> {
        let handles = self.tasks.remove(component).unwrap_or_default();
        let mut result = Ok(());

        for handle in handles {
            match timeout(TASK_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    result = Err(TreelightError::component(
                        component.to_string(),
                        format!("task failed: {}", e),
                    ));
                }
                Err(_) => result = Err(stop_timeout(component)),
            }
        }
        result
    }

    fn log_statistics(&self) {
        if let Some(role) = &self.light_role {
            let channel = role.channel_stats.snapshot();
            info!(
                received = channel.received,
                completed = channel.completed,
                handler_failures = channel.handler_failures,
                sends = channel.sends,
                "Light channel statistics"
            );
        }

        if let Some(role) = &self.detector_role {
            let sessions = role.session_stats.snapshot();
            let channel = role.channel_stats.snapshot();
            info!(
                started = sessions.started,
                closed = sessions.closed,
                failed_captures = sessions.failed_captures,
                readings_sent = sessions.readings_sent,
                send_failures = channel.send_failures,
                "Session statistics"
            );
            if let Some(stats) = &role.detector_stats {
                let detector = stats.snapshot();
                info!(
                    samples = detector.samples,
                    timeouts = detector.timeouts,
                    approaches = detector.approaches,
                    departures = detector.departures,
                    "Detector statistics"
                );
            }
        }
    }
}

fn stop_timeout(component: &str) -> TreelightError {
    warn!("{} component stop timeout", component);
    TreelightError::component(component.to_string(), "stop timeout".to_string())
}
