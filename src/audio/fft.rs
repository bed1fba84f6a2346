//! FFT spectrum analysis using RustFFT.
//!
//! The analyzer is reused for every window the ingest produces, so the plan,
//! the Hann window and the complex scratch buffer are allocated once.

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use super::AnalyzerError;

/// Magnitude spectrum analyzer for a fixed window size.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    /// Create an analyzer for windows of `fft_size` samples.
    pub fn new(fft_size: usize) -> Result<Self, AnalyzerError> {
        if !fft_size.is_power_of_two() || fft_size < 2 {
            return Err(AnalyzerError::InvalidFftSize(fft_size));
        }

        // Hann window to reduce spectral leakage
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let t = i as f32 / (fft_size - 1) as f32;
                0.5 * (1.0 - (2.0 * std::f32::consts::PI * t).cos())
            })
            .collect();

        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        Ok(Self {
            fft,
            fft_size,
            window,
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
        })
    }

    /// FFT size being used.
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Number of magnitude bins produced (FFT size / 2).
    pub fn num_bins(&self) -> usize {
        self.fft_size / 2
    }

    /// Compute the magnitude spectrum of `samples` into `out`.
    ///
    /// Windows shorter than the FFT size are zero-padded. `out` is resized to
    /// `num_bins()`.
    pub fn analyze_into(&mut self, samples: &[f32], out: &mut Vec<f32>) {
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let s = samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(s * self.window[i], 0.0);
        }

        self.fft.process(&mut self.buffer);

        let norm = (self.fft_size as f32).sqrt();
        out.clear();
        out.extend(self.buffer[..self.fft_size / 2].iter().map(|c| c.norm() / norm));
    }

    /// Compute the magnitude spectrum of `samples`.
    pub fn analyze(&mut self, samples: &[f32]) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.num_bins());
        self.analyze_into(samples, &mut out);
        out
    }

    /// Get the frequency in Hz for a given bin index.
    pub fn bin_to_freq(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.fft_size as f32
    }

    /// Get the bin index for a given frequency in Hz.
    pub fn freq_to_bin(&self, freq: f32, sample_rate: u32) -> usize {
        (freq * self.fft_size as f32 / sample_rate as f32).round() as usize
    }

    /// Mean squared magnitude of the bins covering `low_hz..high_hz`.
    pub fn band_energy(&self, spectrum: &[f32], sample_rate: u32, low_hz: f32, high_hz: f32) -> f32 {
        if spectrum.is_empty() {
            return 0.0;
        }
        let lo = self.freq_to_bin(low_hz, sample_rate).min(spectrum.len() - 1);
        let hi = self.freq_to_bin(high_hz, sample_rate).clamp(lo + 1, spectrum.len());
        let sum: f32 = spectrum[lo..hi].iter().map(|&m| m * m).sum();
        sum / (hi - lo) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: u32, num_samples: usize) -> Vec<f32> {
        (0..num_samples)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin())
            .collect()
    }

    #[test]
    fn test_rejects_invalid_size() {
        assert!(matches!(
            SpectrumAnalyzer::new(1000),
            Err(AnalyzerError::InvalidFftSize(1000))
        ));
    }

    #[test]
    fn test_sine_peak_bin() {
        let sample_rate = 44100;
        let mut analyzer = SpectrumAnalyzer::new(2048).unwrap();
        let spectrum = analyzer.analyze(&sine(440.0, sample_rate, 2048));

        let peak_bin = spectrum
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();

        let peak_freq = analyzer.bin_to_freq(peak_bin, sample_rate);
        assert!((peak_freq - 440.0).abs() < 50.0, "peak at {} Hz", peak_freq);
    }

    #[test]
    fn test_short_window_is_zero_padded() {
        let mut analyzer = SpectrumAnalyzer::new(512).unwrap();
        let spectrum = analyzer.analyze(&[0.5; 100]);
        assert_eq!(spectrum.len(), 256);
        assert!(spectrum.iter().all(|m| m.is_finite()));
    }

    #[test]
    fn test_band_energy_separates_low_and_high() {
        let sample_rate = 44100;
        let mut analyzer = SpectrumAnalyzer::new(1024).unwrap();
        let spectrum = analyzer.analyze(&sine(100.0, sample_rate, 1024));

        let bass = analyzer.band_energy(&spectrum, sample_rate, 20.0, 250.0);
        let treble = analyzer.band_energy(&spectrum, sample_rate, 4000.0, 22050.0);
        assert!(bass > treble * 10.0, "bass {} treble {}", bass, treble);
    }
}
