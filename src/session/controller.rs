use super::types::{Session, SessionControl, SessionState};
use crate::channel::ChannelSender;
use crate::config::SessionConfig;
use crate::emotion::{EmotionInference, EmotionReading, InferenceResult, Stage};
use crate::events::{EventBus, TreelightEvent};
use crate::light::LightController;
use crate::presence::PresenceEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct SessionStats {
    started: AtomicU64,
    closed: AtomicU64,
    failed_captures: AtomicU64,
    readings_sent: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStatsSnapshot {
    pub started: u64,
    pub closed: u64,
    pub failed_captures: u64,
    pub readings_sent: u64,
}

impl SessionStats {
    pub fn snapshot(&self) -> SessionStatsSnapshot {
        SessionStatsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
            failed_captures: self.failed_captures.load(Ordering::Relaxed),
            readings_sent: self.readings_sent.load(Ordering::Relaxed),
        }
    }
}

/// Deferred work, at most one pending at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    FirstCapture,
    Confirmation,
    SecondCapture,
    Cooldown,
}

/// Per-visit state machine: `Idle → PersonDetected → LightsOn → PersonGone → Idle`.
///
/// Consumes presence events and control inputs in arrival order, runs the
/// two captures, and sends one reading per stage to the light device.
pub struct SessionController {
    config: SessionConfig,
    inference: Arc<dyn EmotionInference>,
    sender: ChannelSender,
    lights: Option<Arc<LightController>>,
    event_bus: Option<EventBus>,
    stats: Arc<SessionStats>,
    state_tx: watch::Sender<SessionState>,
    /// Open session, or the last closed one
    session_tx: watch::Sender<Option<Session>>,

    state: SessionState,
    current: Option<Session>,
    last_result: Option<InferenceResult>,
    pending: Option<(Pending, Instant)>,
    approach_waiting: bool,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        inference: Arc<dyn EmotionInference>,
        sender: ChannelSender,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let (session_tx, _) = watch::channel(None);
        Self {
            config,
            inference,
            sender,
            lights: None,
            event_bus: None,
            stats: Arc::new(SessionStats::default()),
            state_tx,
            session_tx,
            state: SessionState::Idle,
            current: None,
            last_result: None,
            pending: None,
            approach_waiting: false,
        }
    }

    /// Also drive a local light controller
    pub fn with_lights(mut self, lights: Arc<LightController>) -> Self {
        self.lights = Some(lights);
        self
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<Option<Session>> {
        self.session_tx.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub async fn run(
        mut self,
        mut presence_rx: mpsc::Receiver<PresenceEvent>,
        mut control_rx: mpsc::Receiver<SessionControl>,
        cancel: CancellationToken,
    ) {
        info!("Session controller started");
        let mut presence_open = true;
        let mut control_open = true;

        loop {
            // A disabled branch still evaluates its future, so never leave the deadline empty
            let deadline = self
                .pending
                .map(|(_, at)| at)
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                _ = cancel.cancelled() => break,
                event = presence_rx.recv(), if presence_open => match event {
                    Some(event) => self.on_presence(event, &cancel).await,
                    None => {
                        debug!("Presence queue closed");
                        presence_open = false;
                    }
                },
                control = control_rx.recv(), if control_open => match control {
                    Some(control) => self.on_control(control).await,
                    None => {
                        debug!("Control queue closed");
                        control_open = false;
                    }
                },
                _ = tokio::time::sleep_until(deadline), if self.pending.is_some() => {
                    self.on_timer(&cancel).await;
                }
            }
        }

        if self.current.is_some() {
            self.close_session("shutdown").await;
        }
        info!("Session controller stopped");
    }

    async fn on_presence(&mut self, event: PresenceEvent, cancel: &CancellationToken) {
        match (event, self.state) {
            (PresenceEvent::Approached { .. }, SessionState::Idle) => {
                self.start_session(cancel).await;
            }
            (PresenceEvent::Approached { .. }, SessionState::PersonGone) => {
                debug!("Approach during cool-down, applying it afterwards");
                self.approach_waiting = true;
            }
            (PresenceEvent::Approached { .. }, _) => {
                debug!("Approach ignored, session already running");
            }
            (PresenceEvent::Left { .. }, SessionState::PersonGone) => {
                self.approach_waiting = false;
            }
            (PresenceEvent::Left { .. }, _) if self.current.is_none() => {
                debug!("Departure with no session open");
            }
            (PresenceEvent::Left { .. }, _) => {
                self.close_session("person left").await;
                self.set_state(SessionState::PersonGone);
                self.schedule(Pending::Cooldown, self.config.gone_cooldown());
            }
        }
    }

    async fn on_control(&mut self, control: SessionControl) {
        match control {
            SessionControl::LightsOn => {
                if matches!(self.pending, Some((Pending::Confirmation, _))) {
                    info!(
                        "Light device confirmed, second capture in {:?}",
                        self.config.settle_delay()
                    );
                    self.schedule(Pending::SecondCapture, self.config.settle_delay());
                } else {
                    debug!("Confirmation outside of the waiting step ignored");
                }
            }
            SessionControl::Reset => {
                info!("Session reset requested");
                if self.current.is_some() {
                    self.close_session("reset").await;
                } else if let Some(lights) = &self.lights {
                    lights.reset().await;
                }
                self.pending = None;
                self.approach_waiting = false;
                self.set_state(SessionState::Idle);
            }
        }
    }

    async fn on_timer(&mut self, cancel: &CancellationToken) {
        let Some((pending, _)) = self.pending.take() else {
            return;
        };

        match pending {
            Pending::FirstCapture => self.first_capture(cancel).await,
            Pending::Confirmation => {
                info!("No confirmation received, continuing without it");
                self.schedule(Pending::SecondCapture, self.config.settle_delay());
            }
            Pending::SecondCapture => self.second_capture(cancel).await,
            Pending::Cooldown => {
                self.set_state(SessionState::Idle);
                if std::mem::take(&mut self.approach_waiting) {
                    self.start_session(cancel).await;
                }
            }
        }
    }

    async fn start_session(&mut self, cancel: &CancellationToken) {
        let session = Session::start();
        info!("Session {} started", session.id);
        self.stats.started.fetch_add(1, Ordering::Relaxed);
        self.emit(TreelightEvent::SessionStarted {
            session_id: session.id,
        });

        let _ = self.session_tx.send(Some(session.clone()));
        self.current = Some(session);
        self.last_result = None;
        self.set_state(SessionState::PersonDetected);
        self.first_capture(cancel).await;
    }

    async fn first_capture(&mut self, cancel: &CancellationToken) {
        let Some(result) = self.capture(cancel).await else {
            self.schedule(Pending::FirstCapture, self.config.capture_retry());
            return;
        };

        if let Some(lights) = &self.lights {
            lights.show_solid(&result.emotion).await;
        }
        self.send_reading(Stage::Detected, &result).await;
        self.last_result = Some(result);
        self.schedule(Pending::Confirmation, self.config.confirmation_timeout());
    }

    async fn second_capture(&mut self, cancel: &CancellationToken) {
        let Some(result) = self.capture(cancel).await else {
            self.schedule(Pending::SecondCapture, self.config.capture_retry());
            return;
        };

        self.send_reading(Stage::Confirmed, &result).await;
        if let Some(lights) = &self.lights {
            lights.animate(&result.emotion).await;
        }
        self.last_result = Some(result);
        self.set_state(SessionState::LightsOn);
    }

    async fn capture(&self, cancel: &CancellationToken) -> Option<InferenceResult> {
        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = self.inference.capture_and_infer() => result,
        };

        match &result {
            Some(r) => info!("Captured {} ({}%)", r.emotion, r.score),
            None => {
                self.stats.failed_captures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Capture produced no result, retrying in {:?}",
                    self.config.capture_retry()
                );
            }
        }
        result
    }

    async fn send_reading(&mut self, stage: Stage, result: &InferenceResult) {
        let Some(session) = self.current.as_mut() else {
            return;
        };
        session.last_stage = Some(stage);

        let reading = EmotionReading::new(session.id, stage, result.emotion.clone(), result.score)
            .with_heart_rate(result.heart_rate);
        self.deliver(reading).await;
    }

    async fn deliver(&self, reading: EmotionReading) {
        let session_id = reading.session_id;
        let stage = reading.stage;
        let emotion = reading.emotion.clone();

        if self.sender.send_json(&reading).await.is_ok() {
            self.stats.readings_sent.fetch_add(1, Ordering::Relaxed);
            debug!("Sent {:?} reading for session {}", stage, session_id);
            self.emit(TreelightEvent::ReadingSent {
                session_id,
                stage,
                emotion,
            });
        }
    }

    /// Tell the light device the visit is over and retire the session
    async fn close_session(&mut self, reason: &str) {
        self.pending = None;
        if let Some(lights) = &self.lights {
            lights.reset().await;
        }

        let Some(mut session) = self.current.take() else {
            return;
        };

        let mut gone = EmotionReading::gone(session.id);
        if let Some(result) = &self.last_result {
            gone.emotion = result.emotion.clone();
        }
        self.deliver(gone).await;

        session.last_stage = Some(Stage::Gone);
        session.closed = true;
        info!("Session {} closed ({})", session.id, reason);
        self.stats.closed.fetch_add(1, Ordering::Relaxed);
        self.emit(TreelightEvent::SessionClosed {
            session_id: session.id,
            reason: reason.to_string(),
        });

        let _ = self.session_tx.send(Some(session));
        self.last_result = None;
    }

    fn schedule(&mut self, pending: Pending, after: Duration) {
        debug!("Next step {:?} in {:?}", pending, after);
        self.pending = Some((pending, Instant::now() + after));
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            debug!("Session state {:?} -> {:?}", self.state, state);
            self.state = state;
            let _ = self.state_tx.send(state);
        }
    }

    fn emit(&self, event: TreelightEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event);
        }
    }
}
