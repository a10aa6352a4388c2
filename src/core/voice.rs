use crate::{
    core::{
        audio::{downmix_to_mono, read_audio, resample, write_audio},
        dsp::{log_mel_spectrogram, mel_filterbank, Stft},
        engine::{self, SessionOptions},
        text::{normalize_text, split_sentences, Tokenizer},
    },
    error::{Result, ServiceError},
    model::model_manager::ModelHandle,
    types::{AudioData, CloneRequest},
};

use ndarray::Array2;
use ort::{session::Session, value::Tensor};
use std::{fs, path::PathBuf, sync::Mutex, time::Instant};
use tracing::{debug, info};

const MAX_REFERENCE_SECS: usize = 30;
const DEFAULT_SEGMENT_CHARS: usize = 250;
const DEFAULT_SENTENCE_GAP: usize = 10_000;

/// Anything that can speak `text` in the voice of a reference recording.
pub trait VoiceCloner: Send + Sync {
    fn languages(&self) -> Vec<String>;

    /// Renders the request to `req.file_path` and returns that path.
    fn tts_to_file(&self, req: &CloneRequest) -> Result<PathBuf>;
}

/// The two networks behind a cloner.
pub trait VoiceGraphs: Send + Sync {
    /// `mel` is a row-major `[n_mels, frames]` log-mel of the reference.
    fn speaker_embedding(&self, mel: Vec<f32>, n_mels: usize, frames: usize) -> Result<Vec<f32>>;

    /// Waveform for one token sequence spoken with `embedding`.
    fn synthesize(&self, tokens: Vec<i64>, embedding: &[f32]) -> Result<Vec<f32>>;
}

struct OrtVoiceGraphs {
    speaker_encoder: Mutex<Session>,
    synthesizer: Mutex<Session>,
    mel_input: String,
    embedding_output: String,
    tokens_input: String,
    embedding_input: String,
    waveform_output: String,
}

impl VoiceGraphs for OrtVoiceGraphs {
    fn speaker_embedding(&self, mel: Vec<f32>, n_mels: usize, frames: usize) -> Result<Vec<f32>> {
        let input = Tensor::from_array((vec![1usize, n_mels, frames], mel))?;
        let mut session = self
            .speaker_encoder
            .lock()
            .map_err(|_| ServiceError::Inference("speaker encoder poisoned".into()))?;
        let outputs = session.run(vec![(self.mel_input.clone(), input.into_dyn())])?;
        let value = outputs.get(self.embedding_output.as_str()).ok_or_else(|| {
            ServiceError::Inference(format!("Model did not return `{}`", self.embedding_output))
        })?;
        let (_shape, emb) = value.try_extract_tensor::<f32>()?;
        Ok(emb.to_vec())
    }

    fn synthesize(&self, tokens: Vec<i64>, embedding: &[f32]) -> Result<Vec<f32>> {
        let ids = Tensor::from_array((vec![1usize, tokens.len()], tokens))?;
        let emb = Tensor::from_array((vec![1usize, embedding.len()], embedding.to_vec()))?;

        let mut session = self
            .synthesizer
            .lock()
            .map_err(|_| ServiceError::Inference("synthesizer poisoned".into()))?;
        let outputs = session.run(vec![
            (self.tokens_input.clone(), ids.into_dyn()),
            (self.embedding_input.clone(), emb.into_dyn()),
        ])?;
        let value = outputs.get(self.waveform_output.as_str()).ok_or_else(|| {
            ServiceError::Inference(format!("Model did not return `{}`", self.waveform_output))
        })?;
        let (_shape, wav) = value.try_extract_tensor::<f32>()?;
        Ok(wav.to_vec())
    }
}

/// Audio front-end and segmentation settings of a cloner.
#[derive(Clone, Debug)]
pub struct VoiceConfig {
    pub sample_rate: u32,
    pub speaker_sample_rate: u32,
    pub n_fft: usize,
    pub hop: usize,
    pub n_mels: usize,
    pub max_segment_chars: usize,
    pub sentence_gap: usize,
    pub languages: Vec<String>,
}

/// Two-graph cloner: a speaker encoder turns a log-mel reference into an
/// embedding, and a synthesizer turns token ids plus that embedding into a
/// waveform.
pub struct OnnxVoiceCloner {
    graphs: Box<dyn VoiceGraphs>,
    tokenizer: Tokenizer,
    sample_rate: u32,
    speaker_sample_rate: u32,
    stft: Stft,
    filterbank: Array2<f32>,
    max_segment_chars: usize,
    sentence_gap: usize,
    languages: Vec<String>,
}

impl OnnxVoiceCloner {
    pub fn new(
        config: VoiceConfig,
        tokenizer: Tokenizer,
        graphs: Box<dyn VoiceGraphs>,
    ) -> Result<Self> {
        validate_mel_geometry(config.n_fft, config.hop, config.n_mels, config.speaker_sample_rate)?;
        if config.sample_rate == 0 || config.max_segment_chars == 0 {
            return Err(ServiceError::Manifest(
                "Voice model needs a sample rate and a segment length".into(),
            ));
        }
        Ok(Self {
            graphs,
            tokenizer,
            sample_rate: config.sample_rate,
            speaker_sample_rate: config.speaker_sample_rate,
            stft: Stft::new(config.n_fft, config.hop, true),
            filterbank: mel_filterbank(
                config.speaker_sample_rate,
                config.n_fft,
                config.n_mels,
                0.0,
                8_000.0,
            ),
            max_segment_chars: config.max_segment_chars,
            sentence_gap: config.sentence_gap,
            languages: config.languages,
        })
    }

    pub fn from_handle(handle: &ModelHandle, opts: SessionOptions) -> Result<Self> {
        let mf = &handle.manifest;
        let config = VoiceConfig {
            sample_rate: mf.sample_rate,
            speaker_sample_rate: mf.speaker_sample_rate.unwrap_or(16_000),
            n_fft: mf.n_fft.unwrap_or(1024),
            hop: mf.hop.unwrap_or(256),
            n_mels: mf.n_mels.unwrap_or(80),
            max_segment_chars: mf.max_segment_chars.unwrap_or(DEFAULT_SEGMENT_CHARS),
            sentence_gap: mf.sentence_gap_samples.unwrap_or(DEFAULT_SENTENCE_GAP),
            languages: mf.languages.clone(),
        };
        validate_mel_geometry(config.n_fft, config.hop, config.n_mels, config.speaker_sample_rate)?;

        let tokenizer = Tokenizer::from_file(handle.artifact_path("vocab")?)?;
        let speaker_encoder = engine::load_session(handle.artifact_path("speaker_encoder")?, opts)?;
        let synthesizer = engine::load_session(handle.artifact_path("synthesizer")?, opts)?;

        let (mel_input, embedding_output) = {
            let s = speaker_encoder
                .lock()
                .map_err(|_| ServiceError::Inference("speaker encoder poisoned".into()))?;
            let io = &mf.speaker_encoder_io;
            (
                engine::resolve_name(&engine::input_names(&s), &io.inputs, 0, "mel")?,
                engine::resolve_name(&engine::output_names(&s), &io.outputs, 0, "speaker_embedding")?,
            )
        };
        let (tokens_input, embedding_input, waveform_output) = {
            let s = synthesizer
                .lock()
                .map_err(|_| ServiceError::Inference("synthesizer poisoned".into()))?;
            let declared = engine::input_names(&s);
            (
                engine::resolve_name(&declared, &mf.io.inputs, 0, "tokens")?,
                engine::resolve_name(&declared, &mf.io.inputs, 1, "speaker_embedding")?,
                engine::resolve_name(&engine::output_names(&s), &mf.io.outputs, 0, "waveform")?,
            )
        };

        info!(
            model = %mf.name,
            sample_rate = mf.sample_rate,
            languages = ?mf.languages,
            "voice cloner loaded"
        );

        let graphs = OrtVoiceGraphs {
            speaker_encoder,
            synthesizer,
            mel_input,
            embedding_output,
            tokens_input,
            embedding_input,
            waveform_output,
        };
        Self::new(config, tokenizer, Box::new(graphs))
    }

    fn supports(&self, lang: &str) -> bool {
        if self.languages.is_empty() {
            self.tokenizer.supports_language(lang)
        } else {
            self.languages.iter().any(|l| l == lang)
        }
    }

    fn speaker_embedding(&self, reference: &AudioData) -> Result<Vec<f32>> {
        let mono = downmix_to_mono(&reference.samples, reference.channels);
        let mut mono = resample(&mono, reference.sample_rate, self.speaker_sample_rate)?;
        mono.truncate(MAX_REFERENCE_SECS * self.speaker_sample_rate as usize);
        if mono.is_empty() {
            return Err(ServiceError::InvalidInput("Reference audio is empty".into()));
        }

        let mel = log_mel_spectrogram(&mono, &self.stft, &self.filterbank);
        let (n_mels, frames) = mel.dim();
        let data: Vec<f32> = mel.iter().copied().collect();
        let emb = self.graphs.speaker_embedding(data, n_mels, frames)?;
        if emb.is_empty() {
            return Err(ServiceError::Inference("empty speaker embedding".into()));
        }
        Ok(emb)
    }
}

fn validate_mel_geometry(n_fft: usize, hop: usize, n_mels: usize, sample_rate: u32) -> Result<()> {
    if !(n_fft >= 2 && hop > 0 && hop <= n_fft && n_mels > 0 && sample_rate > 0) {
        return Err(ServiceError::Manifest(format!(
            "Bad speaker encoder geometry in manifest (n_fft {n_fft}, hop {hop}, n_mels {n_mels}, rate {sample_rate})"
        )));
    }
    Ok(())
}

/// Text segments to synthesize, one per sentence when `split` is set.
pub fn plan_segments(text: &str, split: bool, max_chars: usize) -> Vec<String> {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return Vec::new();
    }
    if split {
        split_sentences(&normalized, max_chars)
    } else {
        vec![normalized]
    }
}

/// Concatenates segment waveforms, appending `gap` samples of silence after
/// each one.
pub fn join_segments(segments: Vec<Vec<f32>>, gap: usize) -> Vec<f32> {
    let total: usize = segments.iter().map(|s| s.len() + gap).sum();
    let mut out = Vec::with_capacity(total);
    for seg in segments {
        out.extend(seg);
        out.extend(std::iter::repeat(0.0).take(gap));
    }
    out
}

impl VoiceCloner for OnnxVoiceCloner {
    fn languages(&self) -> Vec<String> {
        self.languages.clone()
    }

    fn tts_to_file(&self, req: &CloneRequest) -> Result<PathBuf> {
        if !self.supports(&req.language) {
            return Err(ServiceError::UnsupportedLanguage(req.language.clone()));
        }
        let segments = plan_segments(&req.text, req.split_sentences, self.max_segment_chars);
        if segments.is_empty() {
            return Err(ServiceError::InvalidInput("Text is empty".into()));
        }

        let started = Instant::now();
        let reference = read_audio(&req.speaker_wav)?;
        let embedding = self.speaker_embedding(&reference)?;

        let mut rendered = Vec::with_capacity(segments.len());
        for (i, seg) in segments.iter().enumerate() {
            let ids = self.tokenizer.encode(seg, &req.language)?;
            debug!(segment = i, tokens = ids.len(), "synthesizing segment");
            rendered.push(self.graphs.synthesize(ids, &embedding)?);
        }
        let samples = join_segments(rendered, self.sentence_gap);

        if let Some(parent) = req.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        write_audio(
            &req.file_path,
            &AudioData {
                samples,
                sample_rate: self.sample_rate,
                channels: 1,
            },
        )?;

        info!(
            out = %req.file_path.display(),
            segments = segments.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "voice clone written"
        );
        Ok(req.file_path.clone())
    }
}
