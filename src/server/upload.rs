use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, Multipart},
};
use std::path::PathBuf;
use tracing::debug;

use crate::{paths::upload_file_name, paths::StorageLayout, server::error::ApiError};

#[derive(Debug)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Bytes,
}

/// Fields the two inference endpoints accept.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub text: Option<String>,
    pub language: Option<String>,
    pub audio_file: Option<UploadedFile>,
}

impl UploadForm {
    pub fn require_audio(&mut self) -> Result<UploadedFile, ApiError> {
        self.audio_file
            .take()
            .ok_or_else(|| ApiError::new("Missing form field `audio_file`"))
    }

    pub fn require_text(&mut self) -> Result<String, ApiError> {
        self.text
            .take()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ApiError::new("Missing form field `text`"))
    }
}

pub async fn read_form(
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<UploadForm, ApiError> {
    let mut multipart =
        multipart.map_err(|e| ApiError::new(format!("Invalid multipart payload: {e}")))?;
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(format!("Failed reading multipart field: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio_file" => {
                let file_name = upload_file_name(field.file_name());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::new(format!("Failed reading `audio_file`: {e}")))?;
                form.audio_file = Some(UploadedFile { file_name, bytes });
            }
            "text" | "language" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::new(format!("Failed reading `{name}`: {e}")))?;
                if name == "text" {
                    form.text = Some(value);
                } else if !value.trim().is_empty() {
                    form.language = Some(value.trim().to_string());
                }
            }
            _ => {}
        }
    }
    Ok(form)
}

/// Copies the upload to `temp_uploads/<file name>`, overwriting any earlier
/// upload of the same name.
pub async fn stage_upload(layout: &StorageLayout, file: &UploadedFile) -> Result<PathBuf, ApiError> {
    tokio::fs::create_dir_all(&layout.uploads_dir).await?;
    let path = layout.upload_path(&file.file_name);
    tokio::fs::write(&path, &file.bytes).await?;
    debug!(path = %path.display(), bytes = file.bytes.len(), "staged upload");
    Ok(path)
}
