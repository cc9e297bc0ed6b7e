use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TreelightConfig {
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub lights: LightsConfig,
    #[serde(default)]
    pub animation: AnimationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SensorConfig {
    /// GPIO pin driving the trigger line
    #[serde(default = "default_trigger_pin")]
    pub trigger_pin: u8,

    /// GPIO pin reading the echo line
    #[serde(default = "default_echo_pin")]
    pub echo_pin: u8,

    /// Upper bound for each half of the echo handshake
    #[serde(default = "default_sensor_timeout_ms")]
    pub timeout_ms: u64,

    /// Width of the trigger pulse in microseconds
    #[serde(default = "default_trigger_pulse_us")]
    pub trigger_pulse_us: u64,

    /// Low-settle period observed once after the pins are opened
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Readings at or above this distance are treated as glitches
    #[serde(default = "default_implausible_cm")]
    pub implausible_cm: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PresenceConfig {
    /// Readings below this distance count toward an approach
    #[serde(default = "default_show_threshold_cm")]
    pub show_threshold_cm: f64,

    /// Readings above this distance count toward a departure
    #[serde(default = "default_noshow_threshold_cm")]
    pub noshow_threshold_cm: f64,

    /// Consecutive readings needed before an event fires
    #[serde(default = "default_debounce_count")]
    pub debounce_count: u32,

    /// Base polling interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Ceiling for the polling interval while the sensor keeps timing out
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChannelConfig {
    /// Delay after the first receive failure
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling for the receive backoff
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after each failure
    #[serde(default = "default_growth_factor")]
    pub growth_factor: u32,

    /// How long a single receive call may block
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,

    /// Uncompleted messages become visible again after this long
    #[serde(default = "default_redelivery_ms")]
    pub redelivery_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LightsConfig {
    /// Run the light service (tree role)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Binary row lights toggled by the blink loop
    #[serde(default = "default_row_pins")]
    pub row_pins: Vec<u8>,

    /// RGB LED pins driven by software PWM
    #[serde(default = "default_red_pin")]
    pub red_pin: u8,
    #[serde(default = "default_green_pin")]
    pub green_pin: u8,
    #[serde(default = "default_blue_pin")]
    pub blue_pin: u8,

    /// Software PWM frequency for the RGB LED
    #[serde(default = "default_pwm_frequency_hz")]
    pub pwm_frequency_hz: u32,

    /// Flash white briefly when the light service starts
    #[serde(default = "default_true")]
    pub startup_flash: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AnimationConfig {
    #[serde(default = "default_blink_interval_ms")]
    pub blink_interval_ms: u64,

    /// Each dim step divides every channel by this value
    #[serde(default = "default_dim_divisor")]
    pub dim_divisor: f64,

    #[serde(default = "default_dim_step_ms")]
    pub dim_step_ms: u64,

    /// Pause once the colour reaches black
    #[serde(default = "default_black_hold_ms")]
    pub black_hold_ms: u64,

    /// Pause after the original colour is restored
    #[serde(default = "default_restore_hold_ms")]
    pub restore_hold_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// Run the detector pipeline (sensor, presence, session control)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Proceed without a confirmation message after this long
    #[serde(default = "default_confirmation_timeout_ms")]
    pub confirmation_timeout_ms: u64,

    /// Wait between confirmation and the second capture
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Retry interval after a capture produced no result
    #[serde(default = "default_capture_retry_ms")]
    pub capture_retry_ms: u64,

    /// Cool-down spent in PersonGone before returning to Idle
    #[serde(default = "default_gone_cooldown_ms")]
    pub gone_cooldown_ms: u64,

    /// Let the session controller animate its own light driver
    #[serde(default)]
    pub drive_local_lights: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InferenceMode {
    Fixed,
    Command,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_mode")]
    pub mode: InferenceMode,

    /// Emotion reported by the fixed backend
    #[serde(default = "default_fixed_emotion")]
    pub emotion: String,

    /// Score reported by the fixed backend
    #[serde(default = "default_fixed_score")]
    pub score: u32,

    /// External classifier program for the command backend
    #[serde(default)]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_inference_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MessagingConfig {
    /// Endpoint name of the presence/camera device
    #[serde(default = "default_detector_device")]
    pub detector_device: String,

    /// Endpoint name of the light controller device
    #[serde(default = "default_light_device")]
    pub light_device: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GpioBackend {
    Sysfs,
    Simulated,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    #[serde(default = "default_gpio_backend")]
    pub gpio_backend: GpioBackend,

    /// sysfs GPIO root
    #[serde(default = "default_gpio_root")]
    pub gpio_root: String,

    /// Heart rate assumed when a payload carries none or is malformed
    #[serde(default = "default_heart_rate")]
    pub default_heart_rate: u32,

    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl TreelightConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("treelight.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .add_source(File::with_name(&path_str).required(false))
            // TREELIGHT__PRESENCE__SHOW_THRESHOLD_CM=80
            .add_source(
                Environment::with_prefix("TREELIGHT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: TreelightConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> crate::error::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(value: u64, name: &str) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::Message(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
            Ok(())
        }

        positive(self.sensor.timeout_ms, "sensor.timeout_ms")?;
        positive(self.sensor.trigger_pulse_us, "sensor.trigger_pulse_us")?;
        positive(self.presence.poll_interval_ms, "presence.poll_interval_ms")?;
        positive(self.channel.base_delay_ms, "channel.base_delay_ms")?;
        positive(self.channel.receive_timeout_ms, "channel.receive_timeout_ms")?;
        positive(self.channel.redelivery_ms, "channel.redelivery_ms")?;
        positive(self.animation.blink_interval_ms, "animation.blink_interval_ms")?;
        positive(self.animation.dim_step_ms, "animation.dim_step_ms")?;
        positive(self.session.capture_retry_ms, "session.capture_retry_ms")?;
        positive(self.inference.timeout_ms, "inference.timeout_ms")?;

        if self.sensor.trigger_pin == self.sensor.echo_pin {
            return Err(ConfigError::Message(
                "Sensor trigger and echo pins must differ".to_string(),
            ));
        }

        if self.presence.show_threshold_cm >= self.presence.noshow_threshold_cm {
            return Err(ConfigError::Message(
                "presence.show_threshold_cm must be below presence.noshow_threshold_cm"
                    .to_string(),
            ));
        }

        if self.sensor.implausible_cm <= self.presence.noshow_threshold_cm {
            return Err(ConfigError::Message(
                "sensor.implausible_cm must be above presence.noshow_threshold_cm".to_string(),
            ));
        }

        if self.presence.debounce_count == 0 {
            return Err(ConfigError::Message(
                "presence.debounce_count must be greater than 0".to_string(),
            ));
        }

        if self.presence.max_poll_interval_ms < self.presence.poll_interval_ms {
            return Err(ConfigError::Message(
                "presence.max_poll_interval_ms must not be below presence.poll_interval_ms"
                    .to_string(),
            ));
        }

        if self.channel.growth_factor == 0 {
            return Err(ConfigError::Message(
                "channel.growth_factor must be at least 1".to_string(),
            ));
        }

        if self.channel.base_delay_ms > self.channel.max_delay_ms {
            return Err(ConfigError::Message(
                "channel.base_delay_ms must not exceed channel.max_delay_ms".to_string(),
            ));
        }

        if self.animation.dim_divisor <= 1.0 || !self.animation.dim_divisor.is_finite() {
            return Err(ConfigError::Message(
                "animation.dim_divisor must be greater than 1.0".to_string(),
            ));
        }

        if self.lights.pwm_frequency_hz == 0 || self.lights.pwm_frequency_hz > 1000 {
            return Err(ConfigError::Message(
                "lights.pwm_frequency_hz must be between 1 and 1000".to_string(),
            ));
        }

        if self.inference.mode == InferenceMode::Command && self.inference.program.is_empty() {
            return Err(ConfigError::Message(
                "inference.program is required for the command backend".to_string(),
            ));
        }

        if self.messaging.detector_device.is_empty() || self.messaging.light_device.is_empty() {
            return Err(ConfigError::Message(
                "Device names must not be empty".to_string(),
            ));
        }

        if self.messaging.detector_device == self.messaging.light_device {
            return Err(ConfigError::Message(
                "Detector and light device names must differ".to_string(),
            ));
        }

        // Every physical pin belongs to exactly one component
        let mut seen = HashSet::new();
        let sensor_pins = [self.sensor.trigger_pin, self.sensor.echo_pin];
        let light_pins = self
            .lights
            .row_pins
            .iter()
            .copied()
            .chain([self.lights.red_pin, self.lights.green_pin, self.lights.blue_pin]);
        for pin in sensor_pins.into_iter().chain(light_pins) {
            if !seen.insert(pin) {
                return Err(ConfigError::Message(format!(
                    "GPIO pin {} is assigned more than once",
                    pin
                )));
            }
        }

        Ok(())
    }
}

impl SensorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn trigger_pulse(&self) -> Duration {
        Duration::from_micros(self.trigger_pulse_us)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl PresenceConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }
}

impl ChannelConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn redelivery(&self) -> Duration {
        Duration::from_millis(self.redelivery_ms)
    }
}

impl AnimationConfig {
    pub fn blink_interval(&self) -> Duration {
        Duration::from_millis(self.blink_interval_ms)
    }

    pub fn dim_step(&self) -> Duration {
        Duration::from_millis(self.dim_step_ms)
    }

    pub fn black_hold(&self) -> Duration {
        Duration::from_millis(self.black_hold_ms)
    }

    pub fn restore_hold(&self) -> Duration {
        Duration::from_millis(self.restore_hold_ms)
    }
}

impl SessionConfig {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn capture_retry(&self) -> Duration {
        Duration::from_millis(self.capture_retry_ms)
    }

    pub fn gone_cooldown(&self) -> Duration {
        Duration::from_millis(self.gone_cooldown_ms)
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            trigger_pin: default_trigger_pin(),
            echo_pin: default_echo_pin(),
            timeout_ms: default_sensor_timeout_ms(),
            trigger_pulse_us: default_trigger_pulse_us(),
            settle_ms: default_settle_ms(),
            implausible_cm: default_implausible_cm(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            show_threshold_cm: default_show_threshold_cm(),
            noshow_threshold_cm: default_noshow_threshold_cm(),
            debounce_count: default_debounce_count(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            growth_factor: default_growth_factor(),
            receive_timeout_ms: default_receive_timeout_ms(),
            redelivery_ms: default_redelivery_ms(),
        }
    }
}

impl Default for LightsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            row_pins: default_row_pins(),
            red_pin: default_red_pin(),
            green_pin: default_green_pin(),
            blue_pin: default_blue_pin(),
            pwm_frequency_hz: default_pwm_frequency_hz(),
            startup_flash: true,
        }
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            blink_interval_ms: default_blink_interval_ms(),
            dim_divisor: default_dim_divisor(),
            dim_step_ms: default_dim_step_ms(),
            black_hold_ms: default_black_hold_ms(),
            restore_hold_ms: default_restore_hold_ms(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confirmation_timeout_ms: default_confirmation_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            capture_retry_ms: default_capture_retry_ms(),
            gone_cooldown_ms: default_gone_cooldown_ms(),
            drive_local_lights: false,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            mode: default_inference_mode(),
            emotion: default_fixed_emotion(),
            score: default_fixed_score(),
            program: String::new(),
            args: Vec::new(),
            timeout_ms: default_inference_timeout_ms(),
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            detector_device: default_detector_device(),
            light_device: default_light_device(),
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            gpio_backend: default_gpio_backend(),
            gpio_root: default_gpio_root(),
            default_heart_rate: default_heart_rate(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_trigger_pin() -> u8 {
    23
}
fn default_echo_pin() -> u8 {
    24
}
fn default_sensor_timeout_ms() -> u64 {
    1000
}
fn default_trigger_pulse_us() -> u64 {
    10
}
fn default_settle_ms() -> u64 {
    2000
}
fn default_implausible_cm() -> f64 {
    3000.0
}

fn default_show_threshold_cm() -> f64 {
    100.0
}
fn default_noshow_threshold_cm() -> f64 {
    150.0
}
fn default_debounce_count() -> u32 {
    4
}
fn default_poll_interval_ms() -> u64 {
    200
}
fn default_max_poll_interval_ms() -> u64 {
    2000
}

fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    600_000
}
fn default_growth_factor() -> u32 {
    10
}
fn default_receive_timeout_ms() -> u64 {
    1000
}
fn default_redelivery_ms() -> u64 {
    30_000
}

fn default_row_pins() -> Vec<u8> {
    vec![4, 17]
}
fn default_red_pin() -> u8 {
    5
}
fn default_green_pin() -> u8 {
    13
}
fn default_blue_pin() -> u8 {
    6
}
fn default_pwm_frequency_hz() -> u32 {
    100
}

fn default_blink_interval_ms() -> u64 {
    500
}
fn default_dim_divisor() -> f64 {
    1.2
}
fn default_dim_step_ms() -> u64 {
    60
}
fn default_black_hold_ms() -> u64 {
    500
}
fn default_restore_hold_ms() -> u64 {
    800
}

fn default_confirmation_timeout_ms() -> u64 {
    30_000
}
fn default_settle_delay_ms() -> u64 {
    8000
}
fn default_capture_retry_ms() -> u64 {
    2000
}
fn default_gone_cooldown_ms() -> u64 {
    5000
}

fn default_inference_mode() -> InferenceMode {
    InferenceMode::Fixed
}
fn default_fixed_emotion() -> String {
    "Neutral".to_string()
}
fn default_fixed_score() -> u32 {
    100
}
fn default_inference_timeout_ms() -> u64 {
    10_000
}

fn default_detector_device() -> String {
    "detector".to_string()
}
fn default_light_device() -> String {
    "tree".to_string()
}

fn default_gpio_backend() -> GpioBackend {
    GpioBackend::Sysfs
}
fn default_gpio_root() -> String {
    "/sys/class/gpio".to_string()
}
fn default_heart_rate() -> u32 {
    80
}
fn default_event_bus_capacity() -> usize {
    100
}
