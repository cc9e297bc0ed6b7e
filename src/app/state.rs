use super::{ComponentState, TreelightOrchestrator};
use std::collections::HashMap;
use tracing::debug;

impl TreelightOrchestrator {
    pub async fn set_component_state(&self, component: &str, state: ComponentState) {
        let previous = self
            .component_states
            .lock()
            .await
            .insert(component.to_string(), state);
        if previous != Some(state) {
            debug!("Component '{}' is now {:?}", component, state);
        }
    }

    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().await.get(component).copied()
    }

    pub async fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        self.component_states.lock().await.clone()
    }

    /// Names of the components currently running, sorted
    pub async fn running_components(&self) -> Vec<String> {
        let states = self.component_states.lock().await;
        let mut running: Vec<String> = states
            .iter()
            .filter(|(_, state)| **state == ComponentState::Running)
            .map(|(name, _)| name.clone())
            .collect();
        running.sort();
        running
    }
}
