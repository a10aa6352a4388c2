use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tokio::{signal, task::JoinHandle};
use tracing::{error, info};

use crate::{
    config::{ModelArgs, ServeArgs, ServiceConfig},
    core::{
        separator::{OnnxSeparator, StemSeparator},
        voice::{OnnxVoiceCloner, VoiceCloner},
    },
    error::Result,
    model::model_manager::ensure_model,
    server::{
        create_router,
        state::{AppState, ModelSlot},
    },
    types::ModelKind,
};

fn load_voice(models: &ModelArgs) -> Result<Arc<dyn VoiceCloner>> {
    let handle = ensure_model(
        &models.voice_model,
        ModelKind::VoiceClone,
        models.voice_manifest_url.as_deref(),
        &models.cache_dir()?,
    )?;
    let cloner = OnnxVoiceCloner::from_handle(&handle, models.session_options())?;
    info!(languages = ?cloner.languages(), "voice cloning model loaded");
    Ok(Arc::new(cloner))
}

fn load_separator(models: &ModelArgs) -> Result<Arc<dyn StemSeparator>> {
    let handle = ensure_model(
        &models.separator_model,
        ModelKind::Separator,
        models.separator_manifest_url.as_deref(),
        &models.cache_dir()?,
    )?;
    let separator = OnnxSeparator::from_handle(&handle, models.session_options())?;
    info!(stems = ?separator.stems(), "vocal separation model loaded");
    Ok(Arc::new(separator))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs `load` and records the outcome in `slot`. A panicking loader counts
/// as a failed load so the slot never stays in `Loading`.
pub fn publish<T: ?Sized>(
    slot: &ModelSlot<T>,
    what: &str,
    load: impl FnOnce() -> Result<Arc<T>>,
) {
    info!(model = what, "loading model");
    match panic::catch_unwind(AssertUnwindSafe(load)) {
        Ok(Ok(model)) => slot.set_ready(model),
        Ok(Err(e)) => {
            error!(model = what, error = %e, "model failed to load");
            slot.set_failed(e.to_string());
        }
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            error!(model = what, panic = %msg, "model loader panicked");
            slot.set_failed(format!("loader panicked: {msg}"));
        }
    }
}

/// Loads both models on the blocking pool and publishes them into `state`
/// as they become ready. Failures are recorded in the slot so requests can
/// report them.
pub fn spawn_model_loader(state: AppState, models: ModelArgs) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        publish(&state.voice, "voice_clone", || load_voice(&models));
        publish(&state.separator, "separator", || load_separator(&models));
    })
}

/// Binds the listener, starts model loading and serves until Ctrl+C/SIGTERM.
pub async fn run(args: ServeArgs) -> anyhow::Result<()> {
    let config = ServiceConfig::from(&args);
    config.layout.create_dirs()?;
    info!(
        uploads = %config.layout.uploads_dir.display(),
        generated = %config.layout.generated_dir.display(),
        "storage ready"
    );

    let state = AppState::new(config);
    let app = create_router(state.clone());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://{}", addr);

    let loader = spawn_model_loader(state, args.models.clone());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down models");
    loader.abort();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;

    #[test]
    fn panicking_loader_marks_slot_failed() {
        let slot: ModelSlot<str> = ModelSlot::loading();
        publish(&slot, "voice_clone", || panic!("end byte index 8 is not a char boundary"));
        let err = slot.get().unwrap_err();
        assert!(matches!(err, ServiceError::ModelUnavailable(_)));
        assert!(err.to_string().contains("char boundary"), "{err}");
    }

    #[test]
    fn loader_errors_and_successes_are_published() {
        let slot: ModelSlot<str> = ModelSlot::loading();
        publish(&slot, "separator", || Err(ServiceError::Manifest("bad".into())));
        assert_eq!(slot.get().unwrap_err().to_string(), "Model failed to load: Manifest error: bad");

        publish(&slot, "separator", || Ok(Arc::from("ready")));
        assert_eq!(&*slot.get().unwrap(), "ready");
    }
}
