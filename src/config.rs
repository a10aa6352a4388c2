use crate::{
    core::engine::SessionOptions,
    error::Result,
    paths::{models_cache_dir, StorageLayout},
};
use axum::http::{header, HeaderMap};
use clap::Args;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 8000;

/// Runtime settings for `serve`. Every flag can also come from the
/// environment.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, env = "AUDIO_STUDIO_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "AUDIO_STUDIO_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Root for `temp_uploads/` and `generated_audio/`.
    #[arg(long, env = "AUDIO_STUDIO_DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Public base URL used in returned stem links; derived from the request
    /// when unset.
    #[arg(long, env = "AUDIO_STUDIO_PUBLIC_URL")]
    pub public_url: Option<String>,

    #[command(flatten)]
    pub models: ModelArgs,

    /// Language passed to the voice cloner when the request names none.
    #[arg(long, env = "AUDIO_STUDIO_LANGUAGE", default_value = "en")]
    pub language: String,

    #[arg(long, env = "AUDIO_STUDIO_UPLOAD_LIMIT_MB", default_value_t = 64)]
    pub upload_limit_mb: usize,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ModelArgs {
    /// Voice-cloning model from the registry (empty = registry default).
    #[arg(long, env = "AUDIO_STUDIO_VOICE_MODEL", default_value = "")]
    pub voice_model: String,

    /// Separation model from the registry (empty = registry default).
    #[arg(long, env = "AUDIO_STUDIO_SEPARATOR_MODEL", default_value = "")]
    pub separator_model: String,

    #[arg(long, env = "AUDIO_STUDIO_VOICE_MANIFEST_URL")]
    pub voice_manifest_url: Option<String>,

    #[arg(long, env = "AUDIO_STUDIO_SEPARATOR_MANIFEST_URL")]
    pub separator_manifest_url: Option<String>,

    /// Model cache directory; defaults to the per-user cache dir.
    #[arg(long, env = "AUDIO_STUDIO_MODELS_DIR")]
    pub models_dir: Option<PathBuf>,

    #[arg(long, env = "AUDIO_STUDIO_INTRA_THREADS")]
    pub intra_threads: Option<usize>,
}

impl ModelArgs {
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.models_dir {
            Some(dir) => Ok(dir.clone()),
            None => models_cache_dir(),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            intra_threads: self.intra_threads,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub public_url: Option<String>,
    pub language: String,
    pub upload_limit_bytes: usize,
    pub layout: StorageLayout,
}

impl ServiceConfig {
    pub fn new(data_dir: &std::path::Path) -> Self {
        Self {
            port: DEFAULT_PORT,
            public_url: None,
            language: "en".into(),
            upload_limit_bytes: 64 * 1024 * 1024,
            layout: StorageLayout::new(data_dir),
        }
    }
}

impl From<&ServeArgs> for ServiceConfig {
    fn from(args: &ServeArgs) -> Self {
        Self {
            port: args.port,
            public_url: args.public_url.clone().filter(|u| !u.trim().is_empty()),
            language: args.language.clone(),
            upload_limit_bytes: args.upload_limit_mb.max(1) * 1024 * 1024,
            layout: StorageLayout::new(&args.data_dir),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        // Proxies may append a comma-separated chain; the first hop is the client-facing one.
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Base URL that clients should use to fetch generated files.
///
/// A configured URL wins. Otherwise the forwarded or direct `Host` header is
/// used with the forwarded scheme (default `http`). Without either,
/// `http://localhost:<port>`.
pub fn resolve_base_url(configured: Option<&str>, headers: &HeaderMap, port: u16) -> String {
    if let Some(url) = configured.map(str::trim).filter(|u| !u.is_empty()) {
        return url.trim_end_matches('/').to_string();
    }

    let host = header_str(headers, "x-forwarded-host")
        .or_else(|| header_str(headers, header::HOST.as_str()));
    match host {
        Some(host) => {
            let scheme = header_str(headers, "x-forwarded-proto").unwrap_or("http");
            format!("{scheme}://{host}")
        }
        None => format!("http://localhost:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn configured_url_wins_and_is_trimmed() {
        let mut h = HeaderMap::new();
        h.insert(header::HOST, HeaderValue::from_static("internal:9000"));
        assert_eq!(
            resolve_base_url(Some("https://audio.example.com/"), &h, 8000),
            "https://audio.example.com"
        );
    }

    #[test]
    fn host_header_is_used_without_config() {
        let mut h = HeaderMap::new();
        h.insert(header::HOST, HeaderValue::from_static("127.0.0.1:8000"));
        assert_eq!(resolve_base_url(None, &h, 8000), "http://127.0.0.1:8000");
    }

    #[test]
    fn forwarded_headers_take_precedence() {
        let mut h = HeaderMap::new();
        h.insert(header::HOST, HeaderValue::from_static("10.0.0.5:8000"));
        h.insert("x-forwarded-host", HeaderValue::from_static("ai.example.org, proxy"));
        h.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        assert_eq!(resolve_base_url(Some("  "), &h, 8000), "https://ai.example.org");
    }

    #[test]
    fn falls_back_to_localhost() {
        assert_eq!(
            resolve_base_url(None, &HeaderMap::new(), 8000),
            "http://localhost:8000"
        );
    }
}
