//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Errors produced while loading or validating an [`EngineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Largest surface or texture edge accepted in a config. Devices may
/// still refuse smaller sizes; the backend checks its own limits.
pub const MAX_DIMENSION: u32 = 16384;

/// Which rendering backend the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Headless wgpu device (Metal, Vulkan or GL).
    #[default]
    Wgpu,
    /// No device at all; draw calls are counted but not executed.
    Null,
}

/// Configuration shared by the session, the audio ingest and the render engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Surface width in pixels.
    pub width: u32,
    /// Surface height in pixels.
    pub height: u32,
    /// Target frame rate, exposed to presets as `fps`.
    pub fps: u32,
    /// Edge length of the seed gradient texture.
    pub texture_size: u32,
    /// Warp mesh columns.
    pub mesh_width: u32,
    /// Warp mesh rows.
    pub mesh_height: u32,
    /// Samples per analysis window (per channel). Must be a power of two.
    pub fft_size: usize,
    /// Interleaved channel count of pushed PCM.
    pub channels: usize,
    /// Sample rate of pushed PCM in Hz.
    pub sample_rate: u32,
    /// Ring buffer capacity, in analysis windows.
    pub ring_capacity_blocks: usize,
    /// Run analysis on a dedicated thread. When false the owner calls
    /// `AudioIngest::process_pending` itself.
    pub analysis_thread: bool,
    /// Beat threshold above the rolling energy average (0.3 = 30% louder).
    pub beat_sensitivity: f32,
    /// Cross-fade used for the preset activated by `open`.
    pub default_transition_ms: u64,
    /// Cross-fade used by `load_preset`.
    pub transition_ms: u64,
    /// Preset activated by `open`. Falls back to the built-in preset.
    pub default_preset: Option<PathBuf>,
    pub backend: BackendKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            fps: 60,
            texture_size: 256,
            mesh_width: 32,
            mesh_height: 24,
            fft_size: 512,
            channels: 2,
            sample_rate: 44100,
            ring_capacity_blocks: 8,
            analysis_thread: true,
            beat_sensitivity: 0.3,
            default_transition_ms: 0,
            transition_ms: 2000,
            default_preset: None,
            backend: BackendKind::Wgpu,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the rest of the engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.fft_size.is_power_of_two() || self.fft_size < 64 {
            return Err(ConfigError::Invalid(format!(
                "fft_size must be a power of two >= 64, got {}",
                self.fft_size
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid("surface size must be non-zero".into()));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION || self.texture_size > MAX_DIMENSION {
            return Err(ConfigError::Invalid(format!(
                "surface {}x{} and texture_size {} must not exceed {}",
                self.width, self.height, self.texture_size, MAX_DIMENSION
            )));
        }
        if !(1..=8).contains(&self.channels) {
            return Err(ConfigError::Invalid(format!(
                "channels must be within 1..=8, got {}",
                self.channels
            )));
        }
        if self.sample_rate == 0 || self.fps == 0 {
            return Err(ConfigError::Invalid("sample_rate and fps must be non-zero".into()));
        }
        if self.mesh_width < 1 || self.mesh_height < 1 {
            return Err(ConfigError::Invalid("mesh size must be at least 1x1".into()));
        }
        if self.ring_capacity_blocks == 0 || self.texture_size == 0 {
            return Err(ConfigError::Invalid(
                "ring_capacity_blocks and texture_size must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Nominal frame interval derived from `fps`.
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.width, 320);
        assert_eq!(config.height, 240);
        assert_eq!(config.fft_size, 512);
    }

    #[test]
    fn test_rejects_non_power_of_two_fft() {
        let config = EngineConfig {
            fft_size: 500,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_oversized_surface() {
        let config = EngineConfig {
            width: 100_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = EngineConfig {
            texture_size: MAX_DIMENSION + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "width": 640, "backend": "null" }}"#).unwrap();

        let config = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.width, 640);
        assert_eq!(config.height, 240);
        assert_eq!(config.backend, BackendKind::Null);
    }
}
