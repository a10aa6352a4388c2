use ndarray::{s, Array2};
use num_complex::Complex32;
use rustfft::{num_traits::Zero, Fft, FftPlanner};
use std::sync::Arc;

/// Hann window. `periodic` drops the repeated end point, which is what
/// spectrogram front-ends trained with TensorFlow/PyTorch expect.
pub fn hann_window(n: usize, periodic: bool) -> Vec<f32> {
    if n <= 1 {
        return vec![1.0; n];
    }
    let denom = if periodic { n as f32 } else { (n - 1) as f32 };
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos())
        .collect()
}

/// Splits interleaved audio into left/right channel vectors. Mono is
/// duplicated; channels beyond the second are ignored.
pub fn to_planar_stereo(interleaved: &[f32], channels: u16) -> (Vec<f32>, Vec<f32>) {
    match channels {
        0 => (Vec::new(), Vec::new()),
        1 => (interleaved.to_vec(), interleaved.to_vec()),
        c => {
            let c = c as usize;
            interleaved
                .chunks_exact(c)
                .map(|frame| (frame[0], frame[1]))
                .unzip()
        }
    }
}

pub fn interleave_stereo(left: &[f32], right: &[f32]) -> Vec<f32> {
    left.iter()
        .zip(right.iter())
        .flat_map(|(&l, &r)| [l, r])
        .collect()
}

/// Centred short-time Fourier transform with cached FFT plans.
pub struct Stft {
    n_fft: usize,
    hop: usize,
    window: Vec<f32>,
    fft_forward: Arc<dyn Fft<f32>>,
    fft_inverse: Arc<dyn Fft<f32>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop: usize, periodic_window: bool) -> Self {
        assert!(n_fft >= 2 && hop > 0 && hop <= n_fft, "invalid STFT geometry");
        let mut planner = FftPlanner::new();
        Self {
            n_fft,
            hop,
            window: hann_window(n_fft, periodic_window),
            fft_forward: planner.plan_fft_forward(n_fft),
            fft_inverse: planner.plan_fft_inverse(n_fft),
        }
    }

    pub fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    pub fn frames_for(&self, len: usize) -> usize {
        1 + len / self.hop
    }

    /// Returns `[frames, n_fft / 2 + 1]`.
    pub fn forward(&self, signal: &[f32]) -> Array2<Complex32> {
        let pad = self.n_fft / 2;
        let frames = self.frames_for(signal.len());
        let bins = self.bins();

        let mut padded = vec![0.0f32; frames * self.hop + self.n_fft];
        padded[pad..pad + signal.len()].copy_from_slice(signal);

        let mut out = Array2::<Complex32>::zeros((frames, bins));
        let mut buf = vec![Complex32::zero(); self.n_fft];

        for fr in 0..frames {
            let start = fr * self.hop;
            for (i, b) in buf.iter_mut().enumerate() {
                *b = Complex32::new(padded[start + i] * self.window[i], 0.0);
            }
            self.fft_forward.process(&mut buf);
            for (k, v) in out.row_mut(fr).iter_mut().enumerate() {
                *v = buf[k];
            }
        }
        out
    }

    /// Weighted overlap-add inverse of [`Stft::forward`], trimmed to `length`.
    pub fn inverse(&self, spec: &Array2<Complex32>, length: usize) -> Vec<f32> {
        let (frames, bins) = spec.dim();
        debug_assert_eq!(bins, self.bins());
        let pad = self.n_fft / 2;
        let total = frames * self.hop + self.n_fft;

        let mut out = vec![0.0f32; total];
        let mut norm = vec![0.0f32; total];
        let mut buf = vec![Complex32::zero(); self.n_fft];
        let scale = 1.0 / self.n_fft as f32;

        for fr in 0..frames {
            let row = spec.row(fr);
            for k in 0..bins {
                buf[k] = row[k];
            }
            // Hermitian mirror for a real-valued signal.
            for k in bins..self.n_fft {
                buf[k] = row[self.n_fft - k].conj();
            }
            self.fft_inverse.process(&mut buf);

            let start = fr * self.hop;
            for i in 0..self.n_fft {
                let w = self.window[i];
                out[start + i] += buf[i].re * scale * w;
                norm[start + i] += w * w;
            }
        }

        (0..length)
            .map(|i| {
                let j = i + pad;
                if j < total && norm[j] > 1e-8 {
                    out[j] / norm[j]
                } else {
                    0.0
                }
            })
            .collect()
    }
}

pub fn magnitude(spec: &Array2<Complex32>) -> Array2<f32> {
    spec.mapv(|c| c.norm())
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular HTK-scale filterbank, `[n_mels, n_fft / 2 + 1]`.
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: f32) -> Array2<f32> {
    let bins = n_fft / 2 + 1;
    let mut fb = Array2::<f32>::zeros((n_mels, bins));
    let fmax = fmax.min(sample_rate as f32 / 2.0);

    let mel_lo = hz_to_mel(fmin);
    let mel_hi = hz_to_mel(fmax);
    let points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f32 / (n_mels + 1) as f32))
        .collect();
    let bin_hz = sample_rate as f32 / n_fft as f32;

    for m in 0..n_mels {
        let (lo, center, hi) = (points[m], points[m + 1], points[m + 2]);
        for k in 0..bins {
            let f = k as f32 * bin_hz;
            let w = if f >= lo && f <= center && center > lo {
                (f - lo) / (center - lo)
            } else if f > center && f <= hi && hi > center {
                (hi - f) / (hi - center)
            } else {
                0.0
            };
            fb[[m, k]] = w;
        }
    }
    fb
}

/// Natural-log mel spectrogram, `[n_mels, frames]`.
pub fn log_mel_spectrogram(samples: &[f32], stft: &Stft, filterbank: &Array2<f32>) -> Array2<f32> {
    let mag = magnitude(&stft.forward(samples));
    // [n_mels, bins] x [bins, frames]
    let mel = filterbank.dot(&mag.t());
    mel.mapv(|v| v.max(1e-5).ln())
}

/// Copies `frames x bins` out of `src` starting at `frame_start`, zero-padding
/// past the end of the spectrogram.
pub fn spectrogram_chunk(src: &Array2<f32>, frame_start: usize, frames: usize, bins: usize) -> Array2<f32> {
    let mut chunk = Array2::<f32>::zeros((frames, bins));
    let (total_frames, total_bins) = src.dim();
    let end = (frame_start + frames).min(total_frames);
    let b = bins.min(total_bins);
    if frame_start < end {
        chunk
            .slice_mut(s![..end - frame_start, ..b])
            .assign(&src.slice(s![frame_start..end, ..b]));
    }
    chunk
}
