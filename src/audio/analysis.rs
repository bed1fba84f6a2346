//! Streaming analysis: RMS energy, band levels and beat detection.
//!
//! Everything here runs once per completed window on the analysis cadence and
//! keeps only a bounded amount of history.

use std::collections::VecDeque;

use super::fft::SpectrumAnalyzer;
use super::frame::{AudioFrame, BandLevels, BeatPulse};
use super::AnalyzerError;

/// Energies below this are treated as silence.
const ENERGY_FLOOR: f32 = 1e-7;

/// Band edges in Hz.
const BASS_RANGE: (f32, f32) = (20.0, 250.0);
const MID_RANGE: (f32, f32) = (250.0, 4000.0);
const TREB_LOW: f32 = 4000.0;

/// Calculate RMS (root mean square) energy of audio samples.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_sq: f32 = samples.iter().map(|&s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Mix interleaved PCM down to mono into `out`.
pub fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
    );
}

/// Energy-based onset detector over a rolling window of past energies.
///
/// A beat fires when the current energy exceeds the rolling average by
/// `sensitivity` (0.3 = 30% louder) and at least `min_spacing` windows have
/// passed since the previous beat.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    history: VecDeque<f32>,
    capacity: usize,
    sensitivity: f32,
    min_spacing: usize,
    since_last: usize,
}

impl BeatDetector {
    /// `history_windows` is the rolling average length, roughly one second of
    /// windows works well.
    pub fn new(history_windows: usize, sensitivity: f32, min_spacing: usize) -> Self {
        let capacity = history_windows.max(2);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            sensitivity: sensitivity.max(0.01),
            min_spacing,
            since_last: usize::MAX / 2,
        }
    }

    /// Detector tuned for windows of `window` samples at `sample_rate`:
    /// one second of history, 200 ms between beats.
    pub fn for_stream(window: usize, sample_rate: u32, sensitivity: f32) -> Self {
        let windows_per_sec = (sample_rate as f32 / window.max(1) as f32).max(1.0);
        Self::new(
            windows_per_sec.round() as usize,
            sensitivity,
            (windows_per_sec * 0.2).round() as usize,
        )
    }

    /// Rolling average of the energies seen so far.
    pub fn average(&self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        self.history.iter().sum::<f32>() / self.history.len() as f32
    }

    /// Feed the energy of the next window.
    pub fn process(&mut self, energy: f32) -> BeatPulse {
        let avg = self.average();
        self.since_last = self.since_last.saturating_add(1);

        let pulse = if energy <= ENERGY_FLOOR || avg <= ENERGY_FLOOR {
            BeatPulse::default()
        } else {
            let ratio = energy / avg - 1.0;
            let confidence = (ratio / (2.0 * self.sensitivity)).clamp(0.0, 1.0);
            let detected = ratio > self.sensitivity && self.since_last >= self.min_spacing;
            if detected {
                self.since_last = 0;
            }
            BeatPulse {
                detected,
                confidence,
            }
        };

        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(energy.max(0.0));

        pulse
    }
}

/// Relative band level tracker.
///
/// Levels are normalized against a slow running average so that 1.0 means
/// "as loud as usual", matching how presets expect `bass`/`mid`/`treb`.
#[derive(Debug, Clone, Default)]
struct BandTracker {
    long_avg: [f32; 3],
    att: [f32; 3],
}

impl BandTracker {
    fn update(&mut self, energies: [f32; 3]) -> BandLevels {
        let mut level = [0.0f32; 3];
        for i in 0..3 {
            let e = energies[i];
            if self.long_avg[i] <= ENERGY_FLOOR {
                self.long_avg[i] = e;
            } else {
                self.long_avg[i] = self.long_avg[i] * 0.99 + e * 0.01;
            }
            level[i] = if self.long_avg[i] > ENERGY_FLOOR {
                (e / self.long_avg[i]).min(10.0)
            } else {
                0.0
            };
            self.att[i] = self.att[i] * 0.8 + level[i] * 0.2;
        }

        BandLevels {
            bass: level[0],
            mid: level[1],
            treb: level[2],
            bass_att: self.att[0],
            mid_att: self.att[1],
            treb_att: self.att[2],
        }
    }
}

/// Turns completed mono windows into [`AudioFrame`]s.
pub struct WindowAnalyzer {
    spectrum: SpectrumAnalyzer,
    beats: BeatDetector,
    bands: BandTracker,
    sample_rate: u32,
    channels: usize,
}

impl WindowAnalyzer {
    pub fn new(
        fft_size: usize,
        channels: usize,
        sample_rate: u32,
        sensitivity: f32,
    ) -> Result<Self, AnalyzerError> {
        Ok(Self {
            spectrum: SpectrumAnalyzer::new(fft_size)?,
            beats: BeatDetector::for_stream(fft_size, sample_rate, sensitivity),
            bands: BandTracker::default(),
            sample_rate,
            channels,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.spectrum.fft_size()
    }

    /// Analyze one mono window and stamp it with `sequence`.
    pub fn analyze(&mut self, mono: &[f32], sequence: u64) -> AudioFrame {
        let spectrum = self.spectrum.analyze(mono);
        let sr = self.sample_rate;
        let nyquist = sr as f32 / 2.0;

        let bass = self.spectrum.band_energy(&spectrum, sr, BASS_RANGE.0, BASS_RANGE.1);
        let mid = self.spectrum.band_energy(&spectrum, sr, MID_RANGE.0, MID_RANGE.1);
        let treb = self.spectrum.band_energy(&spectrum, sr, TREB_LOW, nyquist);

        let beat = self.beats.process(bass);
        let bands = self.bands.update([bass, mid, treb]);

        AudioFrame {
            sequence,
            sample_rate: sr,
            channels: self.channels,
            samples: mono.to_vec(),
            spectrum,
            rms: calculate_rms(mono),
            beat,
            bands,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_calculate_rms() {
        // RMS of a sine wave should be 1/sqrt(2)
        let samples: Vec<f32> = (0..1000)
            .map(|i| (2.0 * PI * i as f32 / 100.0).sin())
            .collect();
        assert!((calculate_rms(&samples) - 0.707).abs() < 0.01);
        assert_eq!(calculate_rms(&[]), 0.0);
    }

    #[test]
    fn test_downmix_stereo() {
        let mut out = Vec::new();
        downmix_into(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_silence_never_beats() {
        let mut detector = BeatDetector::new(8, 0.3, 0);
        for _ in 0..20 {
            let pulse = detector.process(0.0);
            assert!(!pulse.detected);
            assert_eq!(pulse.confidence, 0.0);
        }
    }

    #[test]
    fn test_spike_over_average_is_a_beat() {
        let mut detector = BeatDetector::new(8, 0.3, 2);
        for _ in 0..8 {
            detector.process(1.0);
        }
        let pulse = detector.process(3.0);
        assert!(pulse.detected);
        assert_eq!(pulse.confidence, 1.0);

        // Within min spacing: loud but suppressed
        let pulse = detector.process(5.0);
        assert!(!pulse.detected);
    }

    #[test]
    fn test_steady_energy_has_low_confidence() {
        let mut detector = BeatDetector::new(8, 0.3, 0);
        let mut last = BeatPulse::default();
        for _ in 0..16 {
            last = detector.process(0.5);
        }
        assert!(!last.detected);
        assert!(last.confidence < 0.01);
    }

    #[test]
    fn test_window_analyzer_silent_window() {
        let mut analyzer = WindowAnalyzer::new(512, 2, 44100, 0.3).unwrap();
        let frame = analyzer.analyze(&[0.0; 512], 1);
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.rms, 0.0);
        assert_eq!(frame.beat.confidence, 0.0);
        assert_eq!(frame.bands.bass, 0.0);
        assert_eq!(frame.spectrum.len(), 256);
    }
}
