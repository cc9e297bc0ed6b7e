use super::color::Rgb;
use super::driver::LightDriver;
use crate::config::AnimationConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Cancellation handle for one animation run
#[derive(Debug, Clone)]
pub struct AnimationToken {
    generation: u64,
    cancel: CancellationToken,
}

impl AnimationToken {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            cancel: CancellationToken::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// The colour sequence of the breathing effect, without any timing side effects.
///
/// Dims by `divisor` each step until black, holds black, restores the
/// original colour, holds it, and starts over.
#[derive(Debug, Clone)]
pub struct BreathingCycle {
    original: Rgb,
    current: Rgb,
    restore_next: bool,
    divisor: f64,
    dim_step: Duration,
    black_hold: Duration,
    restore_hold: Duration,
}

impl BreathingCycle {
    pub fn new(original: Rgb, config: &AnimationConfig) -> Self {
        Self {
            original,
            current: original,
            restore_next: false,
            divisor: config.dim_divisor,
            dim_step: config.dim_step(),
            black_hold: config.black_hold(),
            restore_hold: config.restore_hold(),
        }
    }

    /// Next colour to show and how long to hold it
    pub fn next_step(&mut self) -> (Rgb, Duration) {
        if self.restore_next {
            self.restore_next = false;
            self.current = self.original;
            return (self.current, self.restore_hold);
        }

        self.current = self.current.dimmed(self.divisor);
        if self.current.is_black() {
            self.restore_next = true;
            return (self.current, self.black_hold);
        }
        (self.current, self.dim_step)
    }
}

/// Blink and breathing effects on one light driver
#[derive(Clone)]
pub struct LightAnimator {
    driver: LightDriver,
    config: AnimationConfig,
}

impl LightAnimator {
    pub fn new(driver: LightDriver, config: AnimationConfig) -> Self {
        Self { driver, config }
    }

    pub fn driver(&self) -> &LightDriver {
        &self.driver
    }

    /// Run both effects from the driver's current colour until `token` is cancelled
    pub async fn animate(&self, token: AnimationToken) {
        debug!(
            "Animation {} started from {}",
            token.generation(),
            self.driver.color()
        );
        tokio::join!(self.blink(&token), self.breathe(&token));
        debug!("Animation {} stopped", token.generation());
    }

    async fn blink(&self, token: &AnimationToken) {
        let mut on = false;
        loop {
            if token.is_cancelled() {
                return;
            }
            on = !on;
            self.driver.set_rows(on);

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(self.config.blink_interval()) => {}
            }
        }
    }

    async fn breathe(&self, token: &AnimationToken) {
        let mut cycle = BreathingCycle::new(self.driver.color(), &self.config);
        loop {
            let (color, hold) = cycle.next_step();
            if token.is_cancelled() {
                return;
            }
            trace!("Breathing step {}", color);
            self.driver.set_color(color);

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(hold) => {}
            }
        }
    }
}

struct Running {
    token: AnimationToken,
    handle: JoinHandle<()>,
}

/// Owner of the single running animation on a light resource.
///
/// Every handoff cancels and joins the previous animation before anything
/// else touches the lights, so two animations never overlap.
pub struct AnimationSlot {
    animator: LightAnimator,
    running: Mutex<Option<Running>>,
    generations: AtomicU64,
}

impl AnimationSlot {
    pub fn new(animator: LightAnimator) -> Self {
        Self {
            animator,
            running: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    pub fn driver(&self) -> &LightDriver {
        self.animator.driver()
    }

    /// Stop the current animation, show `target`, and animate from it
    pub async fn replace(&self, target: Rgb) -> u64 {
        let mut running = self.running.lock().await;
        Self::stop(running.take()).await;

        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let token = AnimationToken::new(generation);

        self.animator.driver().set_color(target);
        let animator = self.animator.clone();
        let task_token = token.clone();
        let handle = tokio::spawn(async move { animator.animate(task_token).await });

        *running = Some(Running { token, handle });
        generation
    }

    /// Stop the current animation, leaving the lights as they are
    pub async fn cancel(&self) {
        let mut running = self.running.lock().await;
        Self::stop(running.take()).await;
    }

    /// Generation of the animation currently running
    pub async fn current_generation(&self) -> Option<u64> {
        self.running
            .lock()
            .await
            .as_ref()
            .filter(|r| !r.handle.is_finished())
            .map(|r| r.token.generation())
    }

    async fn stop(running: Option<Running>) {
        let Some(Running { token, handle }) = running else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            warn!("Animation {} ended abnormally: {}", token.generation(), e);
        }
    }
}
