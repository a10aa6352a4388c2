use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioData {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    VoiceClone,
    Separator,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::VoiceClone => "voice_clone",
            ModelKind::Separator => "separator",
        }
    }
}

/// How separation masks are filled above the bins the model predicts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskExtension {
    #[default]
    Zeros,
    Average,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub role: String,
    pub file: String,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub size_bytes: u64,
}

/// Optional tensor names; missing entries fall back to the defaults each
/// engine documents.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TensorNames {
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelManifest {
    pub name: String,
    pub version: String,
    pub backend: String,
    pub kind: ModelKind,
    pub sample_rate: u32,
    #[serde(default)]
    pub n_fft: Option<usize>,
    #[serde(default)]
    pub hop: Option<usize>,
    #[serde(default)]
    pub window: Option<usize>,
    #[serde(default)]
    pub freq_bins: Option<usize>,
    #[serde(default)]
    pub n_mels: Option<usize>,
    #[serde(default)]
    pub speaker_sample_rate: Option<u32>,
    #[serde(default)]
    pub max_segment_chars: Option<usize>,
    #[serde(default)]
    pub sentence_gap_samples: Option<usize>,
    #[serde(default)]
    pub mask_extension: MaskExtension,
    #[serde(default)]
    pub stems: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub speaker_encoder_io: TensorNames,
    #[serde(default)]
    pub io: TensorNames,
    pub artifacts: Vec<ModelArtifact>,
}

impl ModelManifest {
    pub fn artifact(&self, role: &str) -> Option<&ModelArtifact> {
        self.artifacts.iter().find(|a| a.role == role)
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.artifacts.is_empty() {
            return Err(format!("manifest `{}` lists no artifacts", self.name));
        }
        if self.backend != "onnx" {
            return Err(format!(
                "manifest `{}` uses unsupported backend `{}`",
                self.name, self.backend
            ));
        }
        for a in &self.artifacts {
            if a.sha256.len() != 64 || !a.sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(format!("artifact `{}` has a malformed sha256", a.file));
            }
        }
        let required: &[&str] = match self.kind {
            ModelKind::VoiceClone => &["speaker_encoder", "synthesizer", "vocab"],
            ModelKind::Separator => &["separator"],
        };
        for role in required {
            if self.artifact(role).is_none() {
                return Err(format!(
                    "{} manifest `{}` is missing the `{role}` artifact",
                    self.kind.as_str(),
                    self.name
                ));
            }
        }
        Ok(())
    }
}

/// Arguments of a single voice-cloning call.
#[derive(Clone, Debug)]
pub struct CloneRequest {
    pub text: String,
    pub speaker_wav: PathBuf,
    pub language: String,
    pub split_sentences: bool,
    pub file_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct SeparationResult {
    pub stem_dir: PathBuf,
    pub stems: Vec<(String, PathBuf)>,
}
