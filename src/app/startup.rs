use super::{ComponentState, TreelightOrchestrator};
use crate::error::{Result, TreelightError};
use crate::events::{EventFilter, EventReceiver};
use crate::session::ControlForwarder;
use std::sync::Arc;
use tracing::{debug, error, info};

impl TreelightOrchestrator {
    /// Register every configured component as stopped
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing treelight components");

        let mut states = self.component_states.lock().await;
        if self.light_role.is_some() {
            states.insert("lights".to_string(), ComponentState::Stopped);
        }
        if let Some(role) = &self.detector_role {
            states.insert("session".to_string(), ComponentState::Stopped);
            if role.detector.is_some() {
                states.insert("detector".to_string(), ComponentState::Stopped);
            }
        }
        if self.keyboard_enabled {
            states.insert("keyboard".to_string(), ComponentState::Stopped);
        }
        let registered = states.len();
        drop(states);

        if registered == 0 {
            return Err(TreelightError::system(
                "Neither the light service nor the session pipeline is enabled",
            ));
        }

        info!("{} components initialized", registered);
        Ok(())
    }

    /// Start all components as background tasks
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting treelight system");
        self.spawn_event_logger();

        // Lights first so the light device is listening before any reading is sent
        self.start_lights().await?;
        self.start_session().await?;
        self.start_detector().await?;

        if self.keyboard_enabled {
            if let Some(keyboard_handler) = &self.keyboard_handler {
                self.set_component_state("keyboard", ComponentState::Starting)
                    .await;

                keyboard_handler.start().await.map_err(|e| {
                    error!("Failed to start keyboard handler: {}", e);
                    e
                })?;

                self.set_component_state("keyboard", ComponentState::Running)
                    .await;
            }
        }

        info!(
            "Treelight system started ({})",
            self.running_components().await.join(", ")
        );
        Ok(())
    }

    async fn start_lights(&mut self) -> Result<()> {
        let Some(role) = self.light_role.as_mut() else {
            return Ok(());
        };
        let channel = role.channel.take().ok_or_else(|| already_started("lights"))?;
        let service = Arc::clone(&role.service);

        self.set_component_state("lights", ComponentState::Starting)
            .await;
        service.startup(self.config.lights.startup_flash).await;

        let handle = tokio::spawn(channel.run(service, self.cancellation_token.clone()));
        self.tasks.entry("lights").or_default().push(handle);

        self.set_component_state("lights", ComponentState::Running)
            .await;
        info!(
            "Light service listening as '{}'",
            self.config.messaging.light_device
        );
        Ok(())
    }

    async fn start_session(&mut self) -> Result<()> {
        let Some(role) = self.detector_role.as_mut() else {
            return Ok(());
        };
        let session = role.session.take().ok_or_else(|| already_started("session"))?;
        let channel = role.channel.take().ok_or_else(|| already_started("session"))?;
        let presence_rx = self
            .presence_rx
            .take()
            .ok_or_else(|| already_started("session"))?;
        let control_rx = self
            .control_rx
            .take()
            .ok_or_else(|| already_started("session"))?;

        self.set_component_state("session", ComponentState::Starting)
            .await;

        let cancel = self.cancellation_token.clone();
        let forwarder = Arc::new(ControlForwarder::new(self.control_tx.clone()));
        let handles = vec![
            tokio::spawn(channel.run(forwarder, cancel.clone())),
            tokio::spawn(session.run(presence_rx, control_rx, cancel)),
        ];
        self.tasks.entry("session").or_default().extend(handles);

        self.set_component_state("session", ComponentState::Running)
            .await;
        info!(
            "Session controller listening as '{}'",
            self.config.messaging.detector_device
        );
        Ok(())
    }

    async fn start_detector(&mut self) -> Result<()> {
        let Some(detector) = self
            .detector_role
            .as_mut()
            .and_then(|role| role.detector.take())
        else {
            return Ok(());
        };

        self.set_component_state("detector", ComponentState::Starting)
            .await;
        let handle = tokio::spawn(detector.run(
            self.presence_tx.clone(),
            self.cancellation_token.clone(),
        ));
        self.tasks.entry("detector").or_default().push(handle);
        self.set_component_state("detector", ComponentState::Running)
            .await;
        Ok(())
    }

    /// Log every bus event until shutdown
    fn spawn_event_logger(&self) {
        let mut receiver = EventReceiver::new(
            self.event_bus.subscribe(),
            EventFilter::All,
            "logger".to_string(),
        );
        let cancel = self.cancellation_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = receiver.recv() => match event {
                        Ok(event) => info!(event = event.event_type(), "{}", event.description()),
                        Err(_) => break,
                    },
                }
            }
            debug!("Event logger stopped");
        });
    }
}

fn already_started(component: &str) -> TreelightError {
    TreelightError::component(component.to_string(), "already started".to_string())
}
