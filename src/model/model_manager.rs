use crate::{
    error::{Result, ServiceError},
    io::{
        crypto::verify_sha256,
        net::{download_with_progress, http_client},
    },
    model::registry::resolve_manifest_url,
    types::{ModelArtifact, ModelKind, ModelManifest},
};

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// A manifest whose artifacts are all present and verified on disk.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    pub manifest: ModelManifest,
    pub artifacts: HashMap<String, PathBuf>,
}

impl ModelHandle {
    pub fn artifact_path(&self, role: &str) -> Result<&Path> {
        self.artifacts
            .get(role)
            .map(PathBuf::as_path)
            .ok_or_else(|| ServiceError::Manifest(format!("no `{role}` artifact in handle")))
    }
}

fn cached_file_name(manifest: &ModelManifest, a: &ModelArtifact) -> String {
    let ext = Path::new(&a.file)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();
    let short = a.sha256.get(..8).unwrap_or(&a.sha256);
    format!("{}-{}-{}{}", manifest.name, short, a.role, ext)
}

pub fn ensure_model(
    model_name: &str,
    kind: ModelKind,
    manifest_url_override: Option<&str>,
    cache_dir: &Path,
) -> Result<ModelHandle> {
    let manifest_url = match manifest_url_override {
        Some(url) => url.to_string(),
        None => resolve_manifest_url(model_name, kind)?,
    };

    let client = http_client()?;
    let manifest: ModelManifest = client
        .get(&manifest_url)
        .send()?
        .error_for_status()?
        .json()?;

    manifest.validate().map_err(ServiceError::Manifest)?;
    if manifest.kind != kind {
        return Err(ServiceError::Manifest(format!(
            "manifest `{}` describes a {} model, expected {}",
            manifest.name,
            manifest.kind.as_str(),
            kind.as_str()
        )));
    }

    fs::create_dir_all(cache_dir)?;

    let mut artifacts = HashMap::new();
    for a in &manifest.artifacts {
        let local_path = cache_dir.join(cached_file_name(&manifest, a));

        if matches!(verify_sha256(&local_path, &a.sha256), Ok(true)) {
            info!(model = %manifest.name, role = %a.role, "using cached artifact");
        } else {
            info!(model = %manifest.name, role = %a.role, url = %a.url, "fetching artifact");
            download_with_progress(&client, &a.url, &local_path)?;
            if !verify_sha256(&local_path, &a.sha256)? {
                return Err(ServiceError::Checksum {
                    path: local_path.display().to_string(),
                });
            }
            if a.size_bytes > 0 {
                let size = fs::metadata(&local_path).map(|m| m.len()).unwrap_or(0);
                if size != a.size_bytes {
                    warn!(
                        path = %local_path.display(),
                        expected = a.size_bytes,
                        got = size,
                        "artifact size mismatch"
                    );
                }
            }
        }
        artifacts.insert(a.role.clone(), local_path);
    }

    Ok(ModelHandle {
        manifest,
        artifacts,
    })
}
