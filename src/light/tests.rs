use super::*;
use crate::channel::{Message, MessageHandler, MessageHub, MessageTransport, ResilientChannel};
use crate::config::{AnimationConfig, ChannelConfig};
use crate::error::GpioError;
use crate::gpio::{Level, PinCache, SimulatedGpio};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Colour output that records every change
#[derive(Default)]
struct RecordingOutput {
    current: Mutex<Rgb>,
    history: Mutex<Vec<(Rgb, Instant)>>,
}

impl RecordingOutput {
    fn history(&self) -> Vec<Rgb> {
        self.history.lock().iter().map(|(c, _)| *c).collect()
    }

    fn writes(&self) -> usize {
        self.history.lock().len()
    }
}

impl ColorOutput for RecordingOutput {
    fn set_color(&self, color: Rgb) -> Result<(), GpioError> {
        *self.current.lock() = color;
        self.history.lock().push((color, Instant::now()));
        Ok(())
    }

    fn color(&self) -> Rgb {
        *self.current.lock()
    }
}

fn fast_animation() -> AnimationConfig {
    AnimationConfig {
        blink_interval_ms: 10,
        dim_divisor: 1.2,
        dim_step_ms: 1,
        black_hold_ms: 5,
        restore_hold_ms: 5,
    }
}

struct Rig {
    gpio: Arc<SimulatedGpio>,
    output: Arc<RecordingOutput>,
    driver: LightDriver,
}

fn rig() -> Rig {
    let gpio = Arc::new(SimulatedGpio::new());
    let output = Arc::new(RecordingOutput::default());
    let pins = Arc::new(PinCache::new(gpio.clone()));
    let driver = LightDriver::with_output(Some(pins), vec![4, 17], output.clone());
    Rig {
        gpio,
        output,
        driver,
    }
}

#[test]
fn test_breathing_cycle_dims_then_restores() {
    let config = AnimationConfig::default();
    let mut cycle = BreathingCycle::new(Rgb::WHITE, &config);

    let mut dims = Vec::new();
    loop {
        let (color, hold) = cycle.next_step();
        dims.push(color);
        if color.is_black() {
            assert_eq!(hold, Duration::from_millis(500));
            break;
        }
        assert_eq!(hold, Duration::from_millis(60));
    }
    assert_eq!(dims.len(), 24);
    assert_eq!(dims[0], Rgb::new(212, 212, 212));

    let (restored, hold) = cycle.next_step();
    assert_eq!(restored, Rgb::WHITE);
    assert_eq!(hold, Duration::from_millis(800));

    // And breathes out again
    assert_eq!(cycle.next_step().0, Rgb::new(212, 212, 212));
}

#[tokio::test]
async fn test_animation_blinks_rows_and_breathes() {
    let rig = rig();
    let slot = AnimationSlot::new(LightAnimator::new(rig.driver.clone(), fast_animation()));

    slot.replace(Rgb::MAGENTA).await;
    tokio::time::sleep(Duration::from_millis(120)).await;
    slot.cancel().await;

    let history = rig.output.history();
    assert_eq!(history[0], Rgb::MAGENTA);
    assert!(history.contains(&Rgb::BLACK));
    assert!(history.iter().skip(1).any(|c| *c == Rgb::MAGENTA));

    let row_levels: Vec<Level> = rig.gpio.writes_to(4).iter().map(|w| w.level).collect();
    assert!(row_levels.len() >= 3);
    assert!(row_levels.windows(2).all(|w| w[0] != w[1]));
    assert_eq!(row_levels[0], Level::High);
}

#[tokio::test]
async fn test_no_writes_after_cancellation() {
    let rig = rig();
    let slot = AnimationSlot::new(LightAnimator::new(rig.driver.clone(), fast_animation()));

    slot.replace(Rgb::RED).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    slot.cancel().await;
    assert_eq!(slot.current_generation().await, None);

    let color_writes = rig.output.writes();
    let pin_writes = rig.gpio.write_count();
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(rig.output.writes(), color_writes);
    assert_eq!(rig.gpio.write_count(), pin_writes);
}

#[tokio::test]
async fn test_replace_never_overlaps_animations() {
    let rig = rig();
    let slot = AnimationSlot::new(LightAnimator::new(rig.driver.clone(), fast_animation()));

    let first = slot.replace(Rgb::RED).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = slot.replace(Rgb::GREEN).await;
    assert_eq!(second, first + 1);
    assert_eq!(slot.current_generation().await, Some(second));

    let handoff = rig.output.writes();
    tokio::time::sleep(Duration::from_millis(60)).await;
    slot.cancel().await;

    // Every green dim step keeps red and blue at zero; a leftover red
    // animation would not
    let after: Vec<Rgb> = rig.output.history().into_iter().skip(handoff).collect();
    assert!(!after.is_empty());
    assert!(after.iter().all(|c| c.r == 0 && c.b == 0));
}

#[tokio::test]
async fn test_soft_pwm_drives_channels() {
    let gpio = Arc::new(SimulatedGpio::new());
    let pins = Arc::new(PinCache::new(gpio.clone()));
    let mut pwm = SoftPwmColor::start(pins, [5, 13, 6], 100).unwrap();

    pwm.set_color(Rgb::RED).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(gpio.level(5), Some(Level::High));
    assert_eq!(gpio.level(13), Some(Level::Low));
    assert_eq!(gpio.level(6), Some(Level::Low));

    pwm.stop();
    // Pins stay open and dark once the thread has exited
    assert_eq!(gpio.level(5), Some(Level::Low));
    assert_eq!(gpio.writes_to(5).last().map(|w| w.level), Some(Level::Low));
    assert!(gpio.is_open(5));
}

#[tokio::test]
async fn test_soft_pwm_partial_duty_toggles() {
    let gpio = Arc::new(SimulatedGpio::new());
    let pins = Arc::new(PinCache::new(gpio.clone()));
    let mut pwm = SoftPwmColor::start(pins, [5, 13, 6], 100).unwrap();

    pwm.set_color(Rgb::new(0, 128, 0)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    pwm.stop();

    let green = gpio.writes_to(13);
    assert!(green.iter().any(|w| w.level == Level::High));
    assert!(green.iter().filter(|w| w.level == Level::Low).count() >= 2);
}

#[tokio::test]
async fn test_disabled_driver_is_a_no_op() {
    let driver = LightDriver::disabled();
    driver.set_rows(true);
    driver.set_color(Rgb::GREEN);
    assert!(driver.rows_on());
    assert_eq!(driver.color(), Rgb::GREEN);
    driver.reset();
    assert_eq!(driver.color(), Rgb::BLACK);
}

fn service_with(rig: &Rig, partner: Option<crate::channel::ChannelSender>) -> LightService {
    let controller = Arc::new(LightController::new(rig.driver.clone(), fast_animation()));
    LightService::new(controller, partner, 80)
}

fn message(payload: &[u8]) -> Message {
    Message {
        id: 1,
        source: "detector".to_string(),
        payload: payload.to_vec(),
        delivery_count: 1,
    }
}

fn reading_payload(session_id: Uuid, stage: u8, emotion: &str, extra: &str) -> Vec<u8> {
    format!(
        r#"{{"sessionid":"{}","stage":{},"emotion":"{}","score":90{}}}"#,
        session_id, stage, emotion, extra
    )
    .into_bytes()
}

#[tokio::test]
async fn test_malformed_payload_falls_back_to_neutral() {
    let rig = rig();
    let service = service_with(&rig, None);

    service
        .handle(&message(&reading_payload(
            Uuid::new_v4(),
            1,
            "Happiness",
            r#","heartrate":"120""#,
        )))
        .await
        .unwrap();
    assert_eq!(service.state().await.heart_rate, 120);

    service.handle(&message(b"{oops")).await.unwrap();

    let state = service.state().await;
    assert_eq!(state.emotion, "Neutral");
    assert_eq!(state.heart_rate, 80);
    service.lights().reset().await;
}

#[tokio::test]
async fn test_detected_shows_solid_colour_and_confirms() {
    let rig = rig();
    let hub = MessageHub::new(Duration::from_secs(30));
    let tree: Arc<dyn MessageTransport> = Arc::new(hub.endpoint("tree"));
    let detector = hub.endpoint("detector");
    let partner = ResilientChannel::new(tree, &ChannelConfig::default()).sender("detector");
    let service = service_with(&rig, Some(partner));

    service
        .handle(&message(&reading_payload(Uuid::new_v4(), 0, "Sadness", "")))
        .await
        .unwrap();

    assert_eq!(rig.driver.color(), Rgb::ORANGE_RED);
    assert!(rig.driver.rows_on());
    assert_eq!(rig.gpio.level(4), Some(Level::High));
    assert_eq!(rig.gpio.level(17), Some(Level::High));
    assert_eq!(service.lights().slot().current_generation().await, None);

    let confirmation = detector
        .receive(Duration::from_millis(50))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(confirmation.payload_str(), Some(r#"{"lightState":"On"}"#));
}

#[tokio::test]
async fn test_confirmed_restarts_animation_only_on_change() {
    let rig = rig();
    let service = service_with(&rig, None);
    let session_id = Uuid::new_v4();
    let slot = service.lights().slot();

    service
        .handle(&message(&reading_payload(session_id, 1, "Happiness", "")))
        .await
        .unwrap();
    let first = slot.current_generation().await.unwrap();

    service
        .handle(&message(&reading_payload(session_id, 1, "Happiness", "")))
        .await
        .unwrap();
    assert_eq!(slot.current_generation().await, Some(first));

    service
        .handle(&message(&reading_payload(session_id, 1, "Anger", "")))
        .await
        .unwrap();
    assert_eq!(slot.current_generation().await, Some(first + 1));

    service.lights().reset().await;
}

#[tokio::test]
async fn test_gone_and_reset_switch_lights_off() {
    let rig = rig();
    let service = service_with(&rig, None);
    let session_id = Uuid::new_v4();

    service
        .handle(&message(&reading_payload(session_id, 1, "Neutral", "")))
        .await
        .unwrap();
    assert!(service.lights().slot().current_generation().await.is_some());

    service
        .handle(&message(&reading_payload(session_id, 2, "", "")))
        .await
        .unwrap();
    assert_eq!(service.lights().slot().current_generation().await, None);
    assert_eq!(rig.driver.color(), Rgb::BLACK);
    assert!(!rig.driver.rows_on());
    assert_eq!(service.state().await.last_stage, None);

    service
        .handle(&message(&reading_payload(session_id, 1, "Fear", "")))
        .await
        .unwrap();
    service.handle(&message(br#"{"command":"reset"}"#)).await.unwrap();
    assert_eq!(service.lights().slot().current_generation().await, None);
    assert_eq!(rig.driver.color(), Rgb::BLACK);
}

#[tokio::test]
async fn test_user_not_present_resets() {
    let rig = rig();
    let service = service_with(&rig, None);

    service
        .handle(&message(&reading_payload(
            Uuid::new_v4(),
            0,
            "Happiness",
            r#","userpresent":false"#,
        )))
        .await
        .unwrap();

    assert_eq!(rig.driver.color(), Rgb::BLACK);
    assert!(!rig.driver.rows_on());
}

#[tokio::test]
async fn test_startup_flash() {
    let rig = rig();
    let service = service_with(&rig, None);

    service.startup(true).await;

    let history = rig.output.history();
    assert_eq!(history[0], Rgb::WHITE);
    assert_eq!(*history.last().unwrap(), Rgb::BLACK);
}
