use super::types::{ComponentState, ShutdownReason};
use crate::channel::{ChannelStats, MessageHub, MessageTransport, ResilientChannel};
use crate::config::{GpioBackend, TreelightConfig};
use crate::emotion::inference_from_config;
use crate::error::Result;
use crate::events::EventBus;
use crate::gpio::{self, DigitalIo, EchoBehavior, SimulatedGpio};
use crate::keyboard_input::{KeyboardInputHandler, KeyboardTargets, SimulatedDistances};
use crate::light::{LightController, LightDriver, LightService};
use crate::presence::{DetectorStats, PresenceDetector, PresenceEvent};
use crate::sensor::{DistanceSensor, DistanceSource};
use crate::session::{SessionControl, SessionController, SessionState, SessionStats};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PRESENCE_QUEUE: usize = 16;
const CONTROL_QUEUE: usize = 16;

/// Light device half of the installation
pub(super) struct LightRole {
    pub(super) service: Arc<LightService>,
    pub(super) channel: Option<ResilientChannel>,
    pub(super) channel_stats: Arc<ChannelStats>,
}

/// Detector device half of the installation
pub(super) struct DetectorRole {
    pub(super) detector: Option<PresenceDetector>,
    pub(super) detector_stats: Option<Arc<DetectorStats>>,
    pub(super) session: Option<SessionController>,
    pub(super) session_stats: Arc<SessionStats>,
    pub(super) session_state: watch::Receiver<SessionState>,
    pub(super) channel: Option<ResilientChannel>,
    pub(super) channel_stats: Arc<ChannelStats>,
}

/// Main application coordinator that wires and supervises every component
pub struct TreelightOrchestrator {
    pub(super) config: TreelightConfig,
    pub(super) event_bus: EventBus,
    pub(super) hub: MessageHub,
    pub(super) simulated_gpio: Option<Arc<SimulatedGpio>>,

    // Components
    pub(super) lights: Option<Arc<LightController>>,
    pub(super) light_role: Option<LightRole>,
    pub(super) detector_role: Option<DetectorRole>,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) keyboard_enabled: bool,

    pub(super) presence_tx: mpsc::Sender<PresenceEvent>,
    pub(super) presence_rx: Option<mpsc::Receiver<PresenceEvent>>,
    pub(super) control_tx: mpsc::Sender<SessionControl>,
    pub(super) control_rx: Option<mpsc::Receiver<SessionControl>>,

    // Lifecycle management
    pub(super) tasks: HashMap<&'static str, Vec<JoinHandle<()>>>,
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl TreelightOrchestrator {
    /// Build every configured component without starting any of them
    pub async fn new(config: TreelightConfig) -> Result<Self> {
        let event_bus = EventBus::new(config.system.event_bus_capacity);
        let hub = MessageHub::new(config.channel.redelivery());
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let (presence_tx, presence_rx) = mpsc::channel(PRESENCE_QUEUE);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);

        let (gpio, simulated_gpio) = open_gpio(&config);

        let lights = if config.lights.enabled || config.session.drive_local_lights {
            let driver = LightDriver::new(gpio.clone(), &config.lights);
            Some(Arc::new(
                LightController::new(driver, config.animation.clone())
                    .with_event_bus(event_bus.clone()),
            ))
        } else {
            None
        };

        let light_role = match (&lights, config.lights.enabled) {
            (Some(lights), true) => Some(build_light_role(&config, &hub, Arc::clone(lights))),
            _ => None,
        };

        let detector_role = if config.session.enabled {
            Some(build_detector_role(
                &config,
                &hub,
                gpio,
                lights.clone(),
                &event_bus,
            ))
        } else {
            None
        };

        let mut targets =
            KeyboardTargets::new(presence_tx.clone(), control_tx.clone(), event_bus.clone());
        if let Some(sim) = &simulated_gpio {
            targets = targets.with_simulated_sensor(Arc::clone(sim), simulated_distances(&config));
        }
        let keyboard_handler = Some(KeyboardInputHandler::new(targets));

        Ok(Self {
            config,
            event_bus,
            hub,
            simulated_gpio,
            lights,
            light_role,
            detector_role,
            keyboard_handler,
            keyboard_enabled: false,
            presence_tx,
            presence_rx: Some(presence_rx),
            control_tx,
            control_rx: Some(control_rx),
            tasks: HashMap::new(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Enable or disable the keyboard input handler
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn hub(&self) -> &MessageHub {
        &self.hub
    }

    pub fn config(&self) -> &TreelightConfig {
        &self.config
    }

    /// Simulated GPIO, when running with `--simulate`
    pub fn simulated_gpio(&self) -> Option<&Arc<SimulatedGpio>> {
        self.simulated_gpio.as_ref()
    }

    pub fn lights(&self) -> Option<&Arc<LightController>> {
        self.lights.as_ref()
    }

    pub fn light_service(&self) -> Option<&Arc<LightService>> {
        self.light_role.as_ref().map(|role| &role.service)
    }

    pub fn session_state(&self) -> Option<watch::Receiver<SessionState>> {
        self.detector_role
            .as_ref()
            .map(|role| role.session_state.clone())
    }

    /// Queue feeding the session controller, shared with the detector
    pub fn presence_sender(&self) -> mpsc::Sender<PresenceEvent> {
        self.presence_tx.clone()
    }

    pub fn control_sender(&self) -> mpsc::Sender<SessionControl> {
        self.control_tx.clone()
    }
}

/// Simulated mode wires an echo model onto the sensor pins, starting with nobody there
fn open_gpio(config: &TreelightConfig) -> (Option<Arc<dyn DigitalIo>>, Option<Arc<SimulatedGpio>>) {
    if config.system.gpio_backend != GpioBackend::Simulated {
        return (gpio::open_backend(&config.system), None);
    }

    let sim = Arc::new(SimulatedGpio::new());
    let far = simulated_distances(config).far_cm;
    sim.attach_echo(
        config.sensor.trigger_pin,
        config.sensor.echo_pin,
        EchoBehavior::Distance(far),
    );
    info!("Using simulated GPIO, sensor reads {:.0}cm", far);

    let gpio: Arc<dyn DigitalIo> = sim.clone();
    (Some(gpio), Some(sim))
}

pub(super) fn simulated_distances(config: &TreelightConfig) -> SimulatedDistances {
    SimulatedDistances {
        near_cm: config.presence.show_threshold_cm / 2.0,
        far_cm: (config.presence.noshow_threshold_cm + 100.0).min(config.sensor.implausible_cm / 2.0),
    }
}

fn build_light_role(
    config: &TreelightConfig,
    hub: &MessageHub,
    lights: Arc<LightController>,
) -> LightRole {
    let endpoint: Arc<dyn MessageTransport> =
        Arc::new(hub.endpoint(&config.messaging.light_device));
    let channel = ResilientChannel::new(endpoint, &config.channel);
    let partner = channel.sender(config.messaging.detector_device.clone());
    let service = Arc::new(LightService::new(
        lights,
        Some(partner),
        config.system.default_heart_rate,
    ));

    LightRole {
        service,
        channel_stats: channel.stats(),
        channel: Some(channel),
    }
}

fn build_detector_role(
    config: &TreelightConfig,
    hub: &MessageHub,
    gpio: Option<Arc<dyn DigitalIo>>,
    lights: Option<Arc<LightController>>,
    event_bus: &EventBus,
) -> DetectorRole {
    let endpoint: Arc<dyn MessageTransport> =
        Arc::new(hub.endpoint(&config.messaging.detector_device));
    let channel = ResilientChannel::new(endpoint, &config.channel);
    let sender = channel.sender(config.messaging.light_device.clone());

    let mut session = SessionController::new(
        config.session.clone(),
        inference_from_config(&config.inference),
        sender,
    )
    .with_event_bus(event_bus.clone());
    if config.session.drive_local_lights {
        if let Some(lights) = lights {
            session = session.with_lights(lights);
        }
    }

    let detector = match gpio {
        Some(gpio) => {
            let sensor: Arc<dyn DistanceSource> =
                Arc::new(DistanceSensor::new(config.sensor.clone(), gpio));
            Some(
                PresenceDetector::new(sensor, &config.presence, &config.sensor)
                    .with_event_bus(event_bus.clone()),
            )
        }
        None => {
            warn!("No GPIO available, presence detection disabled");
            None
        }
    };

    DetectorRole {
        detector_stats: detector.as_ref().map(|d| d.stats()),
        detector,
        session_stats: session.stats(),
        session_state: session.subscribe_state(),
        session: Some(session),
        channel_stats: channel.stats(),
        channel: Some(channel),
    }
}
