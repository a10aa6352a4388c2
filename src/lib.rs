//! # audio-studio-ai
//!
//! HTTP service that clones a voice from a reference recording and splits
//! songs into vocals and accompaniment, with both models run through ONNX
//! Runtime.

pub mod config;
pub mod core;
pub mod error;
pub mod io;
pub mod model;
pub mod paths;
pub mod server;
pub mod types;

pub use crate::{
    config::{resolve_base_url, ModelArgs, ServeArgs, ServiceConfig},
    core::{
        audio::{read_audio, write_audio},
        separator::{OnnxSeparator, StemSeparator},
        voice::{OnnxVoiceCloner, VoiceCloner},
    },
    error::{Result, ServiceError},
    io::progress::set_download_progress_callback,
    model::model_manager::{ensure_model, ModelHandle},
    server::{create_router, state::AppState},
    types::{AudioData, CloneRequest, ModelKind, ModelManifest, SeparationResult},
};
