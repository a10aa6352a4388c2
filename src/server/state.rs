use crate::{
    config::ServiceConfig,
    core::{separator::StemSeparator, voice::VoiceCloner},
    error::{Result, ServiceError},
};
use std::sync::{Arc, RwLock};

enum SlotState<T: ?Sized> {
    Loading,
    Ready(Arc<T>),
    Failed(String),
}

/// A model handle that becomes available some time after startup.
pub struct ModelSlot<T: ?Sized> {
    state: RwLock<SlotState<T>>,
}

impl<T: ?Sized> ModelSlot<T> {
    pub fn loading() -> Self {
        Self {
            state: RwLock::new(SlotState::Loading),
        }
    }

    pub fn ready(model: Arc<T>) -> Self {
        Self {
            state: RwLock::new(SlotState::Ready(model)),
        }
    }

    pub fn set_ready(&self, model: Arc<T>) {
        if let Ok(mut g) = self.state.write() {
            *g = SlotState::Ready(model);
        }
    }

    pub fn set_failed(&self, msg: impl Into<String>) {
        if let Ok(mut g) = self.state.write() {
            *g = SlotState::Failed(msg.into());
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state.read().as_deref(), Ok(SlotState::Ready(_)))
    }

    pub fn get(&self) -> Result<Arc<T>> {
        let g = self
            .state
            .read()
            .map_err(|_| ServiceError::ModelUnavailable("model slot poisoned".into()))?;
        match &*g {
            SlotState::Loading => Err(ServiceError::ModelLoading),
            SlotState::Ready(m) => Ok(Arc::clone(m)),
            SlotState::Failed(msg) => Err(ServiceError::ModelUnavailable(msg.clone())),
        }
    }
}

/// Shared application state; clones are cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub voice: Arc<ModelSlot<dyn VoiceCloner>>,
    pub separator: Arc<ModelSlot<dyn StemSeparator>>,
}

impl AppState {
    /// State whose models are still loading.
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config: Arc::new(config),
            voice: Arc::new(ModelSlot::loading()),
            separator: Arc::new(ModelSlot::loading()),
        }
    }

    pub fn with_models(
        config: ServiceConfig,
        voice: Arc<dyn VoiceCloner>,
        separator: Arc<dyn StemSeparator>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            voice: Arc::new(ModelSlot::ready(voice)),
            separator: Arc::new(ModelSlot::ready(separator)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_transitions() {
        let slot: ModelSlot<str> = ModelSlot::loading();
        assert!(matches!(slot.get(), Err(ServiceError::ModelLoading)));
        assert!(!slot.is_ready());

        slot.set_failed("download failed");
        let err = slot.get().unwrap_err();
        assert_eq!(err.to_string(), "Model failed to load: download failed");

        slot.set_ready(Arc::from("model"));
        assert!(slot.is_ready());
        assert_eq!(&*slot.get().unwrap(), "model");
    }
}
