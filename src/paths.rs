use crate::error::{Result, ServiceError};
use directories::ProjectDirs;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub fn models_cache_dir() -> Result<PathBuf> {
    let proj = ProjectDirs::from("dev", "AudioStudio", "audio-studio-ai")
        .ok_or(ServiceError::CacheDirUnavailable)?;
    let mut p = PathBuf::from(proj.cache_dir());
    p.push("models");
    Ok(p)
}

/// On-disk layout for uploads and generated audio.
#[derive(Clone, Debug)]
pub struct StorageLayout {
    pub uploads_dir: PathBuf,
    pub generated_dir: PathBuf,
    pub stems_dir: PathBuf,
}

impl StorageLayout {
    pub fn new(data_dir: &Path) -> Self {
        let generated_dir = data_dir.join("generated_audio");
        Self {
            uploads_dir: data_dir.join("temp_uploads"),
            stems_dir: generated_dir.join("stems"),
            generated_dir,
        }
    }

    pub fn create_dirs(&self) -> Result<()> {
        fs::create_dir_all(&self.uploads_dir)?;
        fs::create_dir_all(&self.generated_dir)?;
        fs::create_dir_all(&self.stems_dir)?;
        Ok(())
    }

    pub fn upload_path(&self, file_name: &str) -> PathBuf {
        self.uploads_dir.join(file_name)
    }

    pub fn clone_output_path(&self, file_name: &str) -> PathBuf {
        self.generated_dir.join(format!("output_{file_name}.wav"))
    }
}

/// Final path component of a client-supplied filename.
pub fn upload_file_name(client_name: Option<&str>) -> String {
    client_name
        .map(|n| n.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default().trim())
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .map(str::to_string)
        .unwrap_or_else(|| "upload.bin".to_string())
}

/// Filename without its last extension, as used for stem folders.
pub fn file_stem_of(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("output")
        .to_string()
}
