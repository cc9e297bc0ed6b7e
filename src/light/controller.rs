use super::animator::{AnimationSlot, LightAnimator};
use super::color::{emotion_color, Rgb};
use super::driver::LightDriver;
use crate::config::AnimationConfig;
use crate::events::{EventBus, TreelightEvent};
use std::time::SystemTime;
use tracing::info;

/// High-level light operations shared by the light service and the session controller
pub struct LightController {
    slot: AnimationSlot,
    event_bus: Option<EventBus>,
}

impl LightController {
    pub fn new(driver: LightDriver, config: AnimationConfig) -> Self {
        Self {
            slot: AnimationSlot::new(LightAnimator::new(driver, config)),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn driver(&self) -> &LightDriver {
        self.slot.driver()
    }

    pub fn slot(&self) -> &AnimationSlot {
        &self.slot
    }

    /// Steady emotion colour with the row lights on
    pub async fn show_solid(&self, emotion: &str) -> Rgb {
        self.slot.cancel().await;
        let color = emotion_color(emotion);
        self.driver().set_color(color);
        self.driver().set_rows(true);

        info!("Lights showing {} ({})", emotion, color);
        self.emit(TreelightEvent::LightsChanged {
            emotion: emotion.to_string(),
            animating: false,
        });
        color
    }

    /// Restart the blink and breathing animation on the emotion colour
    pub async fn animate(&self, emotion: &str) -> u64 {
        let color = emotion_color(emotion);
        let generation = self.slot.replace(color).await;

        info!("Animating {} ({}), generation {}", emotion, color, generation);
        self.emit(TreelightEvent::LightsChanged {
            emotion: emotion.to_string(),
            animating: true,
        });
        generation
    }

    /// Stop any animation and switch everything off
    pub async fn reset(&self) {
        self.slot.cancel().await;
        self.driver().reset();
        self.emit(TreelightEvent::LightsReset {
            timestamp: SystemTime::now(),
        });
    }

    fn emit(&self, event: TreelightEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event);
        }
    }
}
