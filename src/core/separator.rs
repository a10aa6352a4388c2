use crate::{
    core::{
        audio::{read_audio, resample, write_audio},
        dsp::{interleave_stereo, magnitude, spectrogram_chunk, to_planar_stereo, Stft},
        engine::{self, SessionOptions},
    },
    error::{Result, ServiceError},
    model::model_manager::ModelHandle,
    paths::file_stem_of,
    types::{AudioData, MaskExtension, SeparationResult},
};

use ndarray::{s, Array2, Array3};
use ort::{session::Session, value::Tensor};
use std::{fs, path::Path, sync::Mutex};
use tracing::{debug, info};

const DEFAULT_STEMS: [&str; 2] = ["vocals", "accompaniment"];
const MASK_EPS: f32 = 1e-10;

/// Anything that can split a mixture file into stem WAVs on disk.
pub trait StemSeparator: Send + Sync {
    fn stems(&self) -> Vec<String>;

    /// Writes `<output_dir>/<input file stem>/<stem>.wav` for every stem.
    fn separate_to_file(&self, input: &Path, output_dir: &Path) -> Result<SeparationResult>;
}

/// One forward pass of a separation network.
pub trait SeparationGraph: Send + Sync {
    /// `input` is a row-major `[1, 2, frames, bins]` magnitude chunk. Returns
    /// one buffer of the same shape per stem, in stem order.
    fn run(&self, input: Vec<f32>, frames: usize, bins: usize) -> Result<Vec<Vec<f32>>>;
}

struct OrtSeparationGraph {
    session: Mutex<Session>,
    input_name: String,
    output_names: Vec<String>,
}

impl SeparationGraph for OrtSeparationGraph {
    fn run(&self, input: Vec<f32>, frames: usize, bins: usize) -> Result<Vec<Vec<f32>>> {
        let tensor = Tensor::from_array((vec![1usize, 2, frames, bins], input))?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| ServiceError::Inference("separator session poisoned".into()))?;
        let outputs = session.run(vec![(self.input_name.clone(), tensor.into_dyn())])?;

        self.output_names
            .iter()
            .map(|name| -> Result<Vec<f32>> {
                let value = outputs.get(name.as_str()).ok_or_else(|| {
                    ServiceError::Inference(format!("Model did not return `{name}`"))
                })?;
                let (_shape, out) = value.try_extract_tensor::<f32>()?;
                Ok(out.to_vec())
            })
            .collect()
    }
}

/// STFT geometry and stem layout of a masking model.
#[derive(Clone, Debug)]
pub struct SeparatorConfig {
    pub sample_rate: u32,
    pub n_fft: usize,
    pub hop: usize,
    pub window_frames: usize,
    pub freq_bins: usize,
    pub stems: Vec<String>,
    pub mask_extension: MaskExtension,
}

impl SeparatorConfig {
    fn validate(&self) -> Result<()> {
        let (n_fft, hop, freq_bins) = (self.n_fft, self.hop, self.freq_bins);
        if !(n_fft >= 2 && hop > 0 && hop <= n_fft && self.window_frames > 0) {
            return Err(ServiceError::Manifest("Bad n_fft/hop/window in manifest".into()));
        }
        if freq_bins == 0 || freq_bins > n_fft / 2 + 1 {
            return Err(ServiceError::Manifest(format!(
                "freq_bins {freq_bins} does not fit n_fft {n_fft}"
            )));
        }
        if self.sample_rate == 0 || self.stems.is_empty() {
            return Err(ServiceError::Manifest("Separator needs a sample rate and stems".into()));
        }
        Ok(())
    }
}

/// Spectrogram-masking separator: the graph maps a stereo magnitude chunk
/// `[1, 2, frames, bins]` to one magnitude estimate per stem.
pub struct OnnxSeparator {
    graph: Box<dyn SeparationGraph>,
    stft: Stft,
    sample_rate: u32,
    window_frames: usize,
    freq_bins: usize,
    stems: Vec<String>,
    mask_extension: MaskExtension,
}

impl OnnxSeparator {
    pub fn new(config: SeparatorConfig, graph: Box<dyn SeparationGraph>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            graph,
            stft: Stft::new(config.n_fft, config.hop, true),
            sample_rate: config.sample_rate,
            window_frames: config.window_frames,
            freq_bins: config.freq_bins,
            stems: config.stems,
            mask_extension: config.mask_extension,
        })
    }

    pub fn from_handle(handle: &ModelHandle, opts: SessionOptions) -> Result<Self> {
        let mf = &handle.manifest;
        let config = SeparatorConfig {
            sample_rate: mf.sample_rate,
            n_fft: mf.n_fft.unwrap_or(4096),
            hop: mf.hop.unwrap_or(1024),
            window_frames: mf.window.unwrap_or(512),
            freq_bins: mf.freq_bins.unwrap_or(1024),
            stems: if mf.stems.is_empty() {
                DEFAULT_STEMS.iter().map(|s| s.to_string()).collect()
            } else {
                mf.stems.clone()
            },
            mask_extension: mf.mask_extension,
        };
        config.validate()?;

        let session = engine::load_session(handle.artifact_path("separator")?, opts)?;
        let (input_name, output_names) = {
            let guard = session
                .lock()
                .map_err(|_| ServiceError::Inference("separator session poisoned".into()))?;
            let declared_in = engine::input_names(&guard);
            let declared_out = engine::output_names(&guard);
            let input_name = engine::resolve_name(&declared_in, &mf.io.inputs, 0, "magnitude")?;
            let output_names = config
                .stems
                .iter()
                .enumerate()
                .map(|(i, stem)| engine::resolve_name(&declared_out, &mf.io.outputs, i, stem))
                .collect::<Result<Vec<_>>>()?;
            (input_name, output_names)
        };

        info!(
            model = %mf.name,
            stems = ?config.stems,
            n_fft = config.n_fft,
            hop = config.hop,
            window_frames = config.window_frames,
            freq_bins = config.freq_bins,
            "separator loaded"
        );

        let graph = OrtSeparationGraph {
            session,
            input_name,
            output_names,
        };
        Self::new(config, Box::new(graph))
    }

    /// Per-stem magnitude estimates, `[stem][channel] -> [frames, freq_bins]`.
    fn estimate(&self, mags: [&Array2<f32>; 2]) -> Result<Vec<[Array2<f32>; 2]>> {
        let total_frames = mags[0].nrows();
        let (win, fb) = (self.window_frames, self.freq_bins);

        let mut est: Vec<[Array2<f32>; 2]> = self
            .stems
            .iter()
            .map(|_| {
                [
                    Array2::zeros((total_frames, fb)),
                    Array2::zeros((total_frames, fb)),
                ]
            })
            .collect();

        let mut start = 0usize;
        while start < total_frames {
            let mut data = Vec::with_capacity(2 * win * fb);
            for mag in mags {
                data.extend(spectrogram_chunk(mag, start, win, fb).iter().copied());
            }
            let outputs = self.graph.run(data, win, fb)?;
            if outputs.len() != self.stems.len() {
                return Err(ServiceError::Inference(format!(
                    "Model returned {} stems (expected {})",
                    outputs.len(),
                    self.stems.len()
                )));
            }

            let valid = win.min(total_frames - start);
            for (st, out) in outputs.into_iter().enumerate() {
                if out.len() != 2 * win * fb {
                    return Err(ServiceError::Inference(format!(
                        "Unexpected `{}` length {} (expected {})",
                        self.stems[st],
                        out.len(),
                        2 * win * fb
                    )));
                }
                let chunk = Array3::from_shape_vec((2, win, fb), out)?;
                for ch in 0..2 {
                    est[st][ch]
                        .slice_mut(s![start..start + valid, ..])
                        .assign(&chunk.slice(s![ch, ..valid, ..]));
                }
            }
            debug!(start, valid, total_frames, "separated chunk");
            start += win;
        }

        Ok(est)
    }

/// Separates planar stereo at the model rate into `(left, right)` per stem.
    pub fn separate(&self, left: &[f32], right: &[f32]) -> Result<Vec<(Vec<f32>, Vec<f32>)>> {
        if left.len() != right.len() {
            return Err(ServiceError::InvalidInput("L/R length mismatch".into()));
        }
        let n = left.len();
        if n == 0 {
            return Err(ServiceError::InvalidInput("Empty audio".into()));
        }

        let specs = [self.stft.forward(left), self.stft.forward(right)];
        let mags = [magnitude(&specs[0]), magnitude(&specs[1])];
        let est = self.estimate([&mags[0], &mags[1]])?;

        let bins = self.stft.bins();
        let mut channel_out: Vec<[Vec<f32>; 2]> = vec![[Vec::new(), Vec::new()]; self.stems.len()];
        for ch in 0..2 {
            let per_stem: Vec<Array2<f32>> = est.iter().map(|e| e[ch].clone()).collect();
            let masks = ratio_masks(&per_stem);
            for (st, mask) in masks.iter().enumerate() {
                let full = extend_mask(mask, bins, self.mask_extension);
                let mut masked = specs[ch].clone();
                masked.zip_mut_with(&full, |c, &m| *c *= m);
                channel_out[st][ch] = self.stft.inverse(&masked, n);
            }
        }

        Ok(channel_out
            .into_iter()
            .map(|[l, r]| (l, r))
            .collect())
    }
}

impl StemSeparator for OnnxSeparator {
    fn stems(&self) -> Vec<String> {
        self.stems.clone()
    }

    fn separate_to_file(&self, input: &Path, output_dir: &Path) -> Result<SeparationResult> {
        let audio = read_audio(input)?;
        let (left, right) = to_planar_stereo(&audio.samples, audio.channels);
        let left = resample(&left, audio.sample_rate, self.sample_rate)?;
        let right = resample(&right, audio.sample_rate, self.sample_rate)?;

        let separated = self.separate(&left, &right)?;

        let file_name = input
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("output");
        let stem_dir = output_dir.join(file_stem_of(file_name));
        fs::create_dir_all(&stem_dir)?;

        let mut stems = Vec::with_capacity(separated.len());
        for (name, (l, r)) in self.stems.iter().zip(separated) {
            let dest = stem_dir.join(format!("{name}.wav"));
            let data = AudioData {
                samples: interleave_stereo(&l, &r),
                sample_rate: self.sample_rate,
                channels: 2,
            };
            persist_wav(&stem_dir, &dest, &data)?;
            stems.push((name.clone(), dest));
        }

        info!(input = %input.display(), out = %stem_dir.display(), "separation written");
        Ok(SeparationResult { stem_dir, stems })
    }
}

/// Writes through a temp file in `dir` so readers never see a half-written WAV.
pub fn persist_wav(dir: &Path, dest: &Path, audio: &AudioData) -> Result<()> {
    let tmp = tempfile::Builder::new()
        .prefix(".stem-")
        .suffix(".wav")
        .tempfile_in(dir)?;
    write_audio(tmp.path(), audio)?;
    tmp.persist(dest).map_err(|e| ServiceError::from(e.error))?;
    Ok(())
}

/// Soft masks `e_i^2 / (sum_j e_j^2 + eps)`; they sum to one wherever any
/// stem has energy.
pub fn ratio_masks(estimates: &[Array2<f32>]) -> Vec<Array2<f32>> {
    let Some(first) = estimates.first() else {
        return Vec::new();
    };
    let mut denom = Array2::<f32>::from_elem(first.dim(), MASK_EPS);
    for e in estimates {
        denom.zip_mut_with(e, |d, &v| *d += v * v);
    }
    estimates
        .iter()
        .map(|e| {
            let mut m = e.mapv(|v| v * v);
            m.zip_mut_with(&denom, |x, &d| *x /= d);
            m
        })
        .collect()
}

/// Widens a `[frames, freq_bins]` mask to `[frames, bins]`.
pub fn extend_mask(mask: &Array2<f32>, bins: usize, ext: MaskExtension) -> Array2<f32> {
    let (frames, fb) = mask.dim();
    if fb >= bins {
        return mask.slice(s![.., ..bins]).to_owned();
    }
    let mut full = Array2::<f32>::zeros((frames, bins));
    full.slice_mut(s![.., ..fb]).assign(mask);
    if ext == MaskExtension::Average {
        for (fr, row) in mask.rows().into_iter().enumerate() {
            let avg = row.mean().unwrap_or(0.0);
            full.slice_mut(s![fr, fb..]).fill(avg);
        }
    }
    full
}
