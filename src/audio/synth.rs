//! Synthetic PCM for tests, benches and the demo.
//!
//! Generators produce mono signals; [`interleave`] fans them out to the
//! channel layout the ingest expects.

use std::f32::consts::PI;

/// Generate `duration` seconds of a sine wave at `amplitude` (0.0 to 1.0).
pub fn generate_sine(frequency: f32, sample_rate: u32, duration: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (duration * sample_rate as f32) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * PI * frequency * t).sin()
        })
        .collect()
}

/// Reproducible white noise from a 64-bit LCG.
pub fn generate_white_noise(sample_rate: u32, duration: f32, amplitude: f32, seed: u64) -> Vec<f32> {
    let num_samples = (duration * sample_rate as f32) as usize;
    let mut state = seed;

    (0..num_samples)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let normalized = (state >> 40) as f32 / (1u64 << 24) as f32 * 2.0 - 1.0;
            amplitude * normalized
        })
        .collect()
}

/// Decaying low sine bursts at `bpm`, silent in between.
///
/// `click_freq` around 60-120 Hz lands the energy in the bass band, which is
/// what the beat detector listens to.
pub fn generate_click_track(bpm: f32, sample_rate: u32, duration: f32, click_freq: f32) -> Vec<f32> {
    let num_samples = (duration * sample_rate as f32) as usize;
    let samples_per_beat = ((60.0 / bpm.max(1.0)) * sample_rate as f32) as usize;
    let click_samples = (sample_rate as f32 * 0.05) as usize;

    let mut samples = vec![0.0; num_samples];
    let mut pos = 0;
    while pos < num_samples && samples_per_beat > 0 {
        for i in 0..click_samples.min(num_samples - pos) {
            let t = i as f32 / sample_rate as f32;
            let envelope = (1.0 - i as f32 / click_samples as f32).powi(2);
            samples[pos + i] = envelope * (2.0 * PI * click_freq * t).sin();
        }
        pos += samples_per_beat;
    }

    samples
}

/// Duplicate a mono signal across `channels` interleaved channels.
pub fn interleave(mono: &[f32], channels: usize) -> Vec<f32> {
    let channels = channels.max(1);
    mono.iter()
        .flat_map(|&s| std::iter::repeat(s).take(channels))
        .collect()
}
