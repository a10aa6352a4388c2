use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::{
    config::resolve_base_url,
    server::{
        error::ApiError,
        state::AppState,
        upload::{read_form, stage_upload},
    },
    types::{CloneRequest, SeparationResult},
};
use std::path::Path;

const CLONED_FILE_NAME: &str = "cloned_voice.wav";

pub async fn home() -> Json<Value> {
    Json(json!({
        "status": "online",
        "message": "Audio.io AI Service Running"
    }))
}

fn preview(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::new(format!("inference task failed: {e}")))?
        .map_err(|e| {
            error!(error = %e, "inference failed");
            ApiError::from(e)
        })
}

pub async fn clone_voice(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let voice = state.voice.get()?;

    let mut form = read_form(multipart).await?;
    let text = form.require_text()?;
    let audio = form.require_audio()?;
    let layout = &state.config.layout;

    info!(file = %audio.file_name, "received reference audio");
    let upload = stage_upload(layout, &audio).await?;
    let speaker_wav = tokio::fs::canonicalize(&upload).await?;
    let output = layout.clone_output_path(&audio.file_name);

    info!(
        text = %preview(&text, 30),
        reference = %speaker_wav.display(),
        "cloning voice"
    );

    let req = CloneRequest {
        text,
        speaker_wav,
        language: form.language.unwrap_or_else(|| state.config.language.clone()),
        split_sentences: true,
        file_path: output.clone(),
    };
    run_blocking(move || voice.tts_to_file(&req)).await?;

    match tokio::fs::metadata(&output).await {
        Ok(meta) if meta.len() > 0 => {
            let bytes = tokio::fs::read(&output).await?;
            info!(path = %output.display(), bytes = bytes.len(), "clone ready");
            Ok((
                [
                    (header::CONTENT_TYPE, "audio/wav".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{CLONED_FILE_NAME}\""),
                    ),
                ],
                bytes,
            )
                .into_response())
        }
        _ => Err(ApiError::new("TTS failed to create audio file")),
    }
}

#[derive(Debug, Serialize)]
pub struct SeparationResponse {
    pub status: &'static str,
    pub vocals: String,
    pub music: String,
}

pub async fn separate_vocals(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<SeparationResponse>, ApiError> {
    let separator = state.separator.get()?;

    let mut form = read_form(multipart).await?;
    let audio = form.require_audio()?;
    let layout = &state.config.layout;

    info!(file = %audio.file_name, "received mixture");
    let upload = stage_upload(layout, &audio).await?;
    let stems_dir = layout.stems_dir.clone();

    let result = run_blocking(move || separator.separate_to_file(&upload, &stems_dir)).await?;

    let base = resolve_base_url(state.config.public_url.as_deref(), &headers, state.config.port);
    let vocals = stem_url(&base, &layout.generated_dir, &result, "vocals")?;
    let music = stem_url(&base, &layout.generated_dir, &result, "accompaniment")?;

    info!(dir = %result.stem_dir.display(), "separation ready");
    Ok(Json(SeparationResponse {
        status: "success",
        vocals,
        music,
    }))
}

/// Public URL of the file the separator actually wrote for `stem`.
fn stem_url(
    base: &str,
    generated_dir: &Path,
    result: &SeparationResult,
    stem: &str,
) -> Result<String, ApiError> {
    let path = result
        .stems
        .iter()
        .find(|(name, _)| name == stem)
        .map(|(_, p)| p)
        .ok_or_else(|| ApiError::new(format!("Separator did not produce a `{stem}` stem")))?;
    let rel = path
        .strip_prefix(generated_dir)
        .map_err(|_| ApiError::new(format!("Stem `{stem}` was written outside generated_audio")))?;
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Ok(format!("{base}/generated_audio/{}", parts.join("/")))
}
