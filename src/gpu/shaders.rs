//! WGSL sources for the render passes and preset shader assembly.
//!
//! Preset shader bodies are spliced into the composite module and validated
//! with naga before any pipeline is created, so a broken preset shader is a
//! recoverable [`GpuError::Shader`] rather than a device error.

use wgpu::naga;

use super::GpuError;

pub const WARP: &str = include_str!("shaders/warp.wgsl");
pub const WAVE: &str = include_str!("shaders/wave.wgsl");
pub const BLEND: &str = include_str!("shaders/blend.wgsl");
pub const BLIT: &str = include_str!("shaders/blit.wgsl");
const COMPOSITE_PRELUDE: &str = include_str!("shaders/composite_prelude.wgsl");

const DEFAULT_SHADE_BODY: &str = "    return color;";

/// Full composite module with `body` as the `preset_shade` body, or the
/// pass-through body when `None`.
pub fn composite_source(body: Option<&str>) -> String {
    let body = body.unwrap_or(DEFAULT_SHADE_BODY);
    format!(
        "{}\nfn preset_shade(uv: vec2<f32>, color: vec3<f32>) -> vec3<f32> {{\n{}\n}}\n",
        COMPOSITE_PRELUDE, body
    )
}

/// Parse and validate a WGSL module without touching a device.
pub fn validate_wgsl(label: &str, source: &str) -> Result<(), GpuError> {
    let module = naga::front::wgsl::parse_str(source)
        .map_err(|e| GpuError::Shader(format!("{}: {}", label, e.emit_to_string(source))))?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|e| GpuError::Shader(format!("{}: {}", label, e.emit_to_string(source))))?;
    Ok(())
}

/// Assemble and validate the composite module for a preset shader body.
pub fn preset_composite_source(preset_name: &str, body: &str) -> Result<String, GpuError> {
    let source = composite_source(Some(body));
    validate_wgsl(preset_name, &source)?;
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_modules_validate() {
        for (label, source) in [("warp", WARP), ("wave", WAVE), ("blend", BLEND), ("blit", BLIT)] {
            validate_wgsl(label, source).unwrap();
        }
        validate_wgsl("composite", &composite_source(None)).unwrap();
    }

    #[test]
    fn test_preset_body_accepted() {
        let body = "    return color * vec3<f32>(1.0, 0.5 + 0.5 * sin(frame.time), frame.q_lo.x);";
        assert!(preset_composite_source("tint", body).is_ok());
    }

    #[test]
    fn test_broken_preset_body_rejected() {
        let err = preset_composite_source("broken", "    return colour;").unwrap_err();
        assert!(matches!(err, GpuError::Shader(ref msg) if msg.starts_with("broken")));

        // parses, but the return type is wrong
        assert!(preset_composite_source("typed", "    return 1.0;").is_err());
    }
}
