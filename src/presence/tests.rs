use super::*;
use crate::config::{PresenceConfig, SensorConfig};
use crate::error::{EchoPhase, SensorError};
use crate::sensor::{DistanceSample, DistanceSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn sample(distance_cm: f64) -> DistanceSample {
    DistanceSample::new(distance_cm, 3000.0)
}

fn feed(tracker: &mut PresenceTracker, readings: &[f64]) -> Vec<PresenceEvent> {
    readings
        .iter()
        .filter_map(|d| tracker.observe(&sample(*d)))
        .collect()
}

fn repeat(distance: f64, n: usize) -> Vec<f64> {
    vec![distance; n]
}

#[test]
fn test_approach_then_leave_yields_exactly_two_events() {
    let mut tracker = PresenceTracker::default();
    let readings: Vec<f64> = [repeat(200.0, 4), repeat(50.0, 4), repeat(200.0, 4)].concat();

    let events = feed(&mut tracker, &readings);

    assert_eq!(events.len(), 2);
    assert!(events[0].is_approach());
    assert!(!events[1].is_approach());
    assert_eq!(tracker.state(), PresenceState::Absent);
}

#[test]
fn test_fifth_near_reading_fires_nothing() {
    let mut tracker = PresenceTracker::default();

    let events = feed(&mut tracker, &repeat(50.0, 4));
    assert_eq!(events.len(), 1);

    assert!(tracker.observe(&sample(50.0)).is_none());
    assert!(feed(&mut tracker, &repeat(50.0, 20)).is_empty());
    assert_eq!(tracker.state(), PresenceState::Present);
}

#[test]
fn test_recrossing_show_threshold_while_present_fires_once() {
    let mut tracker = PresenceTracker::default();
    // Three far readings clear show_count but stop short of a departure
    let readings: Vec<f64> = [repeat(50.0, 4), repeat(200.0, 3), repeat(50.0, 4)].concat();

    let events = feed(&mut tracker, &readings);

    assert_eq!(events.len(), 1);
    assert!(events[0].is_approach());
    assert_eq!(tracker.state(), PresenceState::Present);
}

#[test]
fn test_unknown_settles_into_absent_silently() {
    let mut tracker = PresenceTracker::default();
    assert_eq!(tracker.state(), PresenceState::Unknown);

    assert!(feed(&mut tracker, &repeat(400.0, 10)).is_empty());
    assert_eq!(tracker.state(), PresenceState::Absent);
}

#[test]
fn test_dead_zone_touches_neither_counter() {
    let mut tracker = PresenceTracker::default();
    feed(&mut tracker, &repeat(50.0, 2));
    assert_eq!(tracker.show_count(), 2);

    feed(&mut tracker, &repeat(125.0, 10));
    assert_eq!(tracker.show_count(), 2);
    assert_eq!(tracker.noshow_count(), 0);

    // The approach resumes where it left off
    let events = feed(&mut tracker, &repeat(50.0, 2));
    assert_eq!(events.len(), 1);
}

#[test]
fn test_implausible_glitches_cannot_cancel_an_approach() {
    let mut tracker = PresenceTracker::default();
    feed(&mut tracker, &repeat(50.0, 2));

    feed(&mut tracker, &repeat(5000.0, 3));
    assert_eq!(tracker.show_count(), 2);

    let events = feed(&mut tracker, &repeat(50.0, 2));
    assert_eq!(events.len(), 1);
    assert!(events[0].is_approach());
}

#[test]
fn test_plausible_far_readings_do_cancel_an_approach() {
    let mut tracker = PresenceTracker::default();
    feed(&mut tracker, &repeat(50.0, 2));

    feed(&mut tracker, &repeat(200.0, 3));
    assert_eq!(tracker.show_count(), 0);

    assert!(feed(&mut tracker, &repeat(50.0, 2)).is_empty());
}

#[test]
fn test_approach_clears_noshow_counter() {
    let mut tracker = PresenceTracker::default();
    feed(&mut tracker, &[200.0, 200.0, 50.0, 50.0, 50.0, 50.0]);
    assert_eq!(tracker.state(), PresenceState::Present);
    assert_eq!(tracker.noshow_count(), 0);

    // A departure needs a full run of far readings
    assert!(feed(&mut tracker, &repeat(200.0, 3)).is_empty());
    assert_eq!(feed(&mut tracker, &[200.0]).len(), 1);
}

#[test]
fn test_custom_debounce_count() {
    let thresholds = Thresholds {
        debounce_count: 2,
        ..Thresholds::default()
    };
    let mut tracker = PresenceTracker::new(thresholds);
    let events = feed(&mut tracker, &[50.0, 50.0, 200.0, 200.0]);
    assert_eq!(events.len(), 2);
}

/// Replays a script of readings, then keeps answering with a fixed distance
struct ScriptedSource {
    script: Mutex<VecDeque<Result<f64, SensorError>>>,
    idle_distance: f64,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedSource {
    fn new(script: Vec<Result<f64, SensorError>>, idle_distance: f64) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            idle_distance,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DistanceSource for ScriptedSource {
    async fn measure(&self, _timeout: Duration) -> Result<DistanceSample, SensorError> {
        self.calls.lock().push(Instant::now());
        let next = self.script.lock().pop_front();
        match next {
            Some(reading) => reading.map(sample),
            None => Ok(sample(self.idle_distance)),
        }
    }
}

fn fast_config(poll_ms: u64, max_poll_ms: u64) -> (PresenceConfig, SensorConfig) {
    let presence = PresenceConfig {
        poll_interval_ms: poll_ms,
        max_poll_interval_ms: max_poll_ms,
        ..PresenceConfig::default()
    };
    (presence, SensorConfig::default())
}

fn sensor_timeout() -> SensorError {
    SensorError::timeout(EchoPhase::NoEchoStart, Duration::from_millis(1000))
}

#[tokio::test]
async fn test_detector_forwards_transitions_in_order() {
    let script = [repeat(200.0, 4), repeat(50.0, 4), repeat(200.0, 4)]
        .concat()
        .into_iter()
        .map(Ok)
        .collect();
    let source = ScriptedSource::new(script, 125.0);
    let (presence, sensor) = fast_config(1, 4);
    let detector = PresenceDetector::new(source, &presence, &sensor);
    let stats = detector.stats();

    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(detector.run(tx, cancel.clone()));

    let first = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    let second = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert!(first.is_approach());
    assert!(!second.is_approach());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(rx.try_recv().is_err());

    cancel.cancel();
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.approaches, 1);
    assert_eq!(snapshot.departures, 1);
    assert!(snapshot.samples >= 12);
}

#[tokio::test]
async fn test_detector_survives_timeouts() {
    let mut script: Vec<Result<f64, SensorError>> = (0..3).map(|_| Err(sensor_timeout())).collect();
    script.extend(repeat(50.0, 4).into_iter().map(Ok));
    let source = ScriptedSource::new(script, 50.0);
    let (presence, sensor) = fast_config(1, 8);
    let detector = PresenceDetector::new(source, &presence, &sensor);
    let stats = detector.stats();

    let (tx, mut rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(detector.run(tx, cancel.clone()));

    let event = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert!(event.is_approach());
    assert_eq!(stats.snapshot().timeouts, 3);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_poll_interval_doubles_while_failing() {
    let script: Vec<Result<f64, SensorError>> = (0..3).map(|_| Err(sensor_timeout())).collect();
    let source = ScriptedSource::new(script, 125.0);
    let (presence, sensor) = fast_config(10, 40);
    let detector = PresenceDetector::new(source.clone(), &presence, &sensor);

    let (tx, _rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(detector.run(tx, cancel.clone()));

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    handle.await.unwrap();

    let calls = source.call_times();
    assert!(calls.len() >= 5);
    assert!(calls[1] - calls[0] >= Duration::from_millis(10));
    assert!(calls[2] - calls[1] >= Duration::from_millis(20));
    assert!(calls[3] - calls[2] >= Duration::from_millis(40));
}

#[tokio::test]
async fn test_cancellation_is_prompt() {
    let source = ScriptedSource::new(Vec::new(), 125.0);
    let (presence, sensor) = fast_config(1000, 2000);
    let detector = PresenceDetector::new(source, &presence, &sensor);

    let (tx, _rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(detector.run(tx, cancel.clone()));

    tokio::time::sleep(Duration::from_millis(20)).await;
    let started = Instant::now();
    cancel.cancel();
    timeout(Duration::from_millis(500), handle).await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn test_detector_stops_when_receiver_dropped() {
    let source = ScriptedSource::new(Vec::new(), 50.0);
    let (presence, sensor) = fast_config(1, 4);
    let detector = PresenceDetector::new(source, &presence, &sensor);

    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let handle = tokio::spawn(detector.run(tx, CancellationToken::new()));
    timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancellation_while_event_queue_is_full() {
    let script = [repeat(50.0, 4), repeat(200.0, 4)]
        .concat()
        .into_iter()
        .map(Ok)
        .collect();
    let source = ScriptedSource::new(script, 200.0);
    let (presence, sensor) = fast_config(1, 4);
    let detector = PresenceDetector::new(source, &presence, &sensor);

    // Room for the approach only; the departure waits for a free slot
    let (tx, mut rx) = mpsc::channel(1);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(detector.run(tx, cancel.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    timeout(Duration::from_millis(500), handle).await.unwrap().unwrap();

    assert!(rx.recv().await.unwrap().is_approach());
    assert!(rx.try_recv().is_err());
}
