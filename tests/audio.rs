use std::f32::consts::PI;

use audio_studio_ai::{read_audio, write_audio, AudioData};
use tempfile::tempdir;

fn sine(frames: usize, sr: u32, channels: u16) -> AudioData {
    let mut samples = Vec::with_capacity(frames * channels as usize);
    for i in 0..frames {
        let t = i as f32 / sr as f32;
        for c in 0..channels {
            samples.push((2.0 * PI * (440.0 + 220.0 * c as f32) * t).sin() * 0.25);
        }
    }
    AudioData {
        samples,
        sample_rate: sr,
        channels,
    }
}

#[test]
fn wav_written_then_read_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    let audio = sine(4_000, 22_050, 2);
    write_audio(&path, &audio).unwrap();

    let back = read_audio(&path).unwrap();
    assert_eq!(back.sample_rate, 22_050);
    assert_eq!(back.channels, 2);
    assert_eq!(back.frames(), 4_000);
    for (a, b) in audio.samples.iter().zip(&back.samples) {
        assert!((a - b).abs() < 1e-3);
    }
}

#[test]
fn out_of_range_samples_are_clamped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("loud.wav");
    let audio = AudioData {
        samples: vec![2.0, -2.0, 0.5],
        sample_rate: 8_000,
        channels: 1,
    };
    write_audio(&path, &audio).unwrap();

    let ints: Vec<i16> = hound::WavReader::open(&path)
        .unwrap()
        .into_samples::<i16>()
        .map(|s| s.unwrap())
        .collect();
    assert_eq!(ints[0], i16::MAX);
    assert_eq!(ints[1], -i16::MAX);
}

#[test]
fn garbage_input_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("noise.mp3");
    std::fs::write(&path, b"definitely not audio").unwrap();
    assert!(read_audio(&path).is_err());
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempdir().unwrap();
    let err = read_audio(dir.path().join("nope.wav")).unwrap_err();
    assert!(err.to_string().contains("Failed to open audio file"));
}
