use crate::error::{Result, TreelightError};
use crate::events::{EventBus, TreelightEvent};
use crate::gpio::{EchoBehavior, SimulatedGpio};
use crate::presence::PresenceEvent;
use crate::session::SessionControl;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::{self, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Debug actions bound to keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Approach,
    Leave,
    Reset,
    Quit,
}

impl KeyCommand {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char('a') | KeyCode::Char('A') => Some(KeyCommand::Approach),
            KeyCode::Char('l') | KeyCode::Char('L') => Some(KeyCommand::Leave),
            KeyCode::Char('r') | KeyCode::Char('R') => Some(KeyCommand::Reset),
            KeyCode::Char('q') | KeyCode::Char('Q') | KeyCode::Esc => Some(KeyCommand::Quit),
            _ => None,
        }
    }
}

/// Simulated sensor distances used for approach and leave
#[derive(Debug, Clone, Copy)]
pub struct SimulatedDistances {
    pub near_cm: f64,
    pub far_cm: f64,
}

/// Where key commands end up
pub struct KeyboardTargets {
    presence_tx: mpsc::Sender<PresenceEvent>,
    control_tx: mpsc::Sender<SessionControl>,
    event_bus: EventBus,
    simulated: Option<(Arc<SimulatedGpio>, SimulatedDistances)>,
}

impl KeyboardTargets {
    pub fn new(
        presence_tx: mpsc::Sender<PresenceEvent>,
        control_tx: mpsc::Sender<SessionControl>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            presence_tx,
            control_tx,
            event_bus,
            simulated: None,
        }
    }

    /// Move the simulated echo instead of injecting presence events
    pub fn with_simulated_sensor(
        mut self,
        gpio: Arc<SimulatedGpio>,
        distances: SimulatedDistances,
    ) -> Self {
        self.simulated = Some((gpio, distances));
        self
    }

    pub async fn dispatch(&self, command: KeyCommand) {
        match command {
            KeyCommand::Approach => self.presence(true).await,
            KeyCommand::Leave => self.presence(false).await,
            KeyCommand::Reset => {
                if self.control_tx.send(SessionControl::Reset).await.is_err() {
                    warn!("Session controller not running, reset dropped");
                }
            }
            KeyCommand::Quit => {
                let shutdown_event = TreelightEvent::ShutdownRequested {
                    timestamp: SystemTime::now(),
                    reason: "User requested via keyboard".to_string(),
                };
                if let Err(e) = self.event_bus.publish(shutdown_event) {
                    warn!("Failed to publish shutdown event: {}", e);
                }
            }
        }
    }

    async fn presence(&self, approach: bool) {
        if let Some((gpio, distances)) = &self.simulated {
            let distance = if approach {
                distances.near_cm
            } else {
                distances.far_cm
            };
            info!("Simulated sensor now reads {:.0}cm", distance);
            gpio.set_echo_behavior(EchoBehavior::Distance(distance));
            return;
        }

        let event = if approach {
            PresenceEvent::Approached { distance_cm: 0.0 }
        } else {
            PresenceEvent::Left { distance_cm: 0.0 }
        };
        if self.presence_tx.send(event).await.is_err() {
            warn!("Session controller not running, {:?} dropped", event);
        }
    }
}

/// Keyboard input handler for exercising sessions without a person in front of the tree
pub struct KeyboardInputHandler {
    targets: Arc<KeyboardTargets>,
    cancellation_token: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl KeyboardInputHandler {
    pub fn new(targets: KeyboardTargets) -> Self {
        Self {
            targets: Arc::new(targets),
            cancellation_token: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard input handler - a: approach, l: leave, r: reset, q: quit");

        let targets = Arc::clone(&self.targets);
        let cancellation_token = self.cancellation_token.clone();
        let runtime_handle = Handle::current();

        let handle = task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }
            debug!("Raw mode enabled - keyboard handler active");

            while !cancellation_token.is_cancelled() {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }
                        let Some(command) = KeyCommand::from_key(key_event.code) else {
                            debug!("Key pressed: {:?}", key_event.code);
                            continue;
                        };

                        info!("Key command: {:?}", command);
                        let targets = Arc::clone(&targets);
                        runtime_handle.spawn(async move { targets.dispatch(command).await });
                        if command == KeyCommand::Quit {
                            break;
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                        std::thread::sleep(Duration::from_millis(100));
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            }
            debug!("Keyboard input handler task exited");
        });

        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| TreelightError::component("keyboard".to_string(), e.to_string()))?;
        }

        // The blocking task may have failed before restoring the terminal
        let _ = disable_raw_mode();
        Ok(())
    }
}
