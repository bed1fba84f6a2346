//! Analyzed audio windows handed from the ingest to the render engine.

use serde::Serialize;

/// Beat pulse derived from the rolling energy average.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BeatPulse {
    pub detected: bool,
    /// 0.0 when the window is at or below the rolling average, 1.0 when it is
    /// at least twice the beat threshold.
    pub confidence: f32,
}

/// Bass / mid / treble energies, instantaneous and attenuated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BandLevels {
    pub bass: f32,
    pub mid: f32,
    pub treb: f32,
    pub bass_att: f32,
    pub mid_att: f32,
    pub treb_att: f32,
}

/// One analyzed window of PCM. Immutable once published.
#[derive(Debug, Clone, Serialize)]
pub struct AudioFrame {
    /// Monotonic sequence number; 0 is reserved for the silent frame.
    pub sequence: u64,
    pub sample_rate: u32,
    /// Channel count of the PCM this window was mixed down from.
    pub channels: usize,
    /// Mono mixdown, `fft_size` samples.
    pub samples: Vec<f32>,
    /// Magnitude bins, `fft_size / 2` values.
    pub spectrum: Vec<f32>,
    pub rms: f32,
    pub beat: BeatPulse,
    pub bands: BandLevels,
}

impl AudioFrame {
    /// The zero frame returned before any window has been analyzed.
    pub fn silent(window: usize, channels: usize, sample_rate: u32) -> Self {
        Self {
            sequence: 0,
            sample_rate,
            channels,
            samples: vec![0.0; window],
            spectrum: vec![0.0; window / 2],
            rms: 0.0,
            beat: BeatPulse::default(),
            bands: BandLevels::default(),
        }
    }

    /// Whether this is the placeholder frame rather than analyzed audio.
    pub fn is_silent_placeholder(&self) -> bool {
        self.sequence == 0
    }

    /// Window length in samples.
    pub fn window(&self) -> usize {
        self.samples.len()
    }
}
