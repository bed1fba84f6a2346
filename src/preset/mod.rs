//! Presets: parsed equation sets, shader bodies and resource requirements.
//!
//! A [`Preset`] is immutable once parsed and shared by `Arc` between the
//! [`PresetStore`] and the render engine.

pub mod expr;
pub mod parser;
pub mod store;
pub mod vars;

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

pub use expr::Program;
pub use parser::parse_preset;
pub use store::{Capabilities, PendingActivation, PresetSource, PresetStore};
pub use vars::SymbolTable;

/// Malformed preset text.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-based line in the preset source.
    pub line: usize,
    pub message: String,
}

/// Kinds of resources a preset can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    Texture,
    CustomWaveform,
    CustomShape,
    WgslShader,
    HlslShader,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Texture => "texture",
            ResourceKind::CustomWaveform => "custom waveform",
            ResourceKind::CustomShape => "custom shape",
            ResourceKind::WgslShader => "WGSL shader",
            ResourceKind::HlslShader => "HLSL shader",
        };
        f.write_str(name)
    }
}

/// A resource declared by a preset.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceRequirement {
    /// Image file, resolved against the preset's directory.
    Texture(PathBuf),
    CustomWaveform(u32),
    CustomShape(u32),
    WgslShader,
    /// Milkdrop 2 `warp_`/`comp_` shader, identified by its key prefix.
    HlslShader(String),
}

impl ResourceRequirement {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceRequirement::Texture(_) => ResourceKind::Texture,
            ResourceRequirement::CustomWaveform(_) => ResourceKind::CustomWaveform,
            ResourceRequirement::CustomShape(_) => ResourceKind::CustomShape,
            ResourceRequirement::WgslShader => ResourceKind::WgslShader,
            ResourceRequirement::HlslShader(_) => ResourceKind::HlslShader,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ResourceRequirement::Texture(path) => path.display().to_string(),
            ResourceRequirement::CustomWaveform(i) => format!("wavecode_{}", i),
            ResourceRequirement::CustomShape(i) => format!("shapecode_{}", i),
            ResourceRequirement::WgslShader => "shader".to_string(),
            ResourceRequirement::HlslShader(key) => key.clone(),
        }
    }
}

/// Errors from loading a preset. None of these touch the active preset.
#[derive(Error, Debug)]
pub enum PresetError {
    #[error("Failed to read preset {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Preset parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Preset requires unsupported {kind} ({detail})")]
    UnsupportedFeature { kind: ResourceKind, detail: String },
}

/// An extra waveform drawn on top of the main one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CustomWave {
    pub index: u32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
    pub scaling: f32,
    /// Vertical position of the baseline, 0 at the bottom.
    pub y: f32,
    /// Draw spectrum magnitudes instead of samples.
    pub spectrum: bool,
}

impl CustomWave {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            r: 1.0,
            g: 1.0,
            b: 1.0,
            a: 1.0,
            scaling: 1.0,
            y: 0.5,
            spectrum: false,
        }
    }
}

/// A parsed, validated preset.
#[derive(Debug, Clone)]
pub struct Preset {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) symbols: SymbolTable,
    pub(crate) base_values: Vec<f64>,
    pub(crate) per_frame_init: Program,
    pub(crate) per_frame: Program,
    pub(crate) per_pixel: Program,
    pub(crate) shader: Option<String>,
    pub(crate) requirements: Vec<ResourceRequirement>,
    pub(crate) custom_waves: Vec<CustomWave>,
}

impl Preset {
    /// Source path or `inline:` identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Initial value of every slot before `per_frame_init` runs.
    pub fn base_values(&self) -> &[f64] {
        &self.base_values
    }

    /// Base value of a named variable.
    pub fn base_value(&self, name: &str) -> Option<f64> {
        self.symbols.slot(name).map(|slot| self.base_values[slot])
    }

    pub fn per_frame_init(&self) -> &Program {
        &self.per_frame_init
    }

    pub fn per_frame(&self) -> &Program {
        &self.per_frame
    }

    pub fn per_pixel(&self) -> &Program {
        &self.per_pixel
    }

    /// WGSL body of `preset_shade`, if the preset provides one.
    pub fn shader(&self) -> Option<&str> {
        self.shader.as_deref()
    }

    pub fn requirements(&self) -> &[ResourceRequirement] {
        &self.requirements
    }

    /// Texture files this preset samples from.
    pub fn textures(&self) -> impl Iterator<Item = &PathBuf> {
        self.requirements.iter().filter_map(|r| match r {
            ResourceRequirement::Texture(path) => Some(path),
            _ => None,
        })
    }

    pub fn custom_waves(&self) -> &[CustomWave] {
        &self.custom_waves
    }

    /// Reject the preset if it needs anything `capabilities` lacks.
    pub fn check_capabilities(&self, capabilities: &Capabilities) -> Result<(), PresetError> {
        match self
            .requirements
            .iter()
            .find(|r| !capabilities.supports(r.kind()))
        {
            Some(missing) => Err(PresetError::UnsupportedFeature {
                kind: missing.kind(),
                detail: missing.describe(),
            }),
            None => Ok(()),
        }
    }

    /// Equation-free preset used when no preset file is configured: a slow
    /// zoom-and-rotate feedback tunnel with the default waveform.
    pub fn builtin_default() -> Self {
        let symbols = SymbolTable::with_builtins();
        let mut base_values = symbols.default_values();
        base_values[vars::ZOOM] = 1.02;
        base_values[vars::ROT] = 0.01;
        base_values[vars::DECAY] = 0.95;
        base_values[vars::WAVE_G] = 0.7;
        base_values[vars::WAVE_B] = 0.3;

        Self {
            id: "builtin:default".to_string(),
            name: "Default".to_string(),
            symbols,
            base_values,
            per_frame_init: Program::default(),
            per_frame: Program::default(),
            per_pixel: Program::default(),
            shader: None,
            requirements: Vec::new(),
            custom_waves: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_default_is_self_contained() {
        let preset = Preset::builtin_default();
        assert_eq!(preset.id(), "builtin:default");
        assert!(preset.requirements().is_empty());
        assert!(preset.check_capabilities(&Capabilities::none()).is_ok());
        assert_eq!(preset.base_value("decay"), Some(0.95));
    }

    #[test]
    fn test_requirement_kinds() {
        assert_eq!(
            ResourceRequirement::Texture("a.png".into()).kind(),
            ResourceKind::Texture
        );
        assert_eq!(
            ResourceRequirement::HlslShader("warp".into()).describe(),
            "warp"
        );
        assert_eq!(ResourceKind::CustomShape.to_string(), "custom shape");
    }
}
