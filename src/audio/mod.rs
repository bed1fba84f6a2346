//! Audio ingestion and analysis.
//!
//! This module provides:
//! - A non-blocking ingest ring that accepts interleaved PCM from any thread
//! - FFT spectrum analysis via RustFFT
//! - Beat detection against a rolling energy average, RMS and band levels
//! - Audio file loading via Symphonia (WAV, MP3, FLAC, AAC)

pub mod analysis;
pub mod fft;
pub mod frame;
pub mod ingest;
pub mod loader;
pub mod synth;

use thiserror::Error;

/// Errors raised when configuring the analysis chain.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyzerError {
    #[error("FFT size must be a power of two >= 2, got {0}")]
    InvalidFftSize(usize),

    #[error("Failed to start analysis worker: {0}")]
    WorkerSpawn(String),
}

// Re-export commonly used types
pub use analysis::{calculate_rms, BeatDetector, WindowAnalyzer};
pub use fft::SpectrumAnalyzer;
pub use frame::{AudioFrame, BandLevels, BeatPulse};
pub use ingest::{AudioIngest, IngestStats};
pub use loader::{load_audio, AudioData, AudioError};
pub use synth::{generate_click_track, generate_sine, generate_white_noise, interleave};
