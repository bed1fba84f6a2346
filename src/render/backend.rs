//! The GPU seam of the render engine.
//!
//! [`RenderEngine`](super::RenderEngine) does all CPU-side work itself and
//! talks to the device only through [`RenderBackend`]. The wgpu
//! implementation lives in [`crate::gpu::WgpuBackend`]; [`NullBackend`]
//! tracks the same resource lifecycle without a device.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::state::{FrameParams, WarpMesh};
use super::waveform::WaveVertex;
use crate::gpu::resources::{GpuResourceHandle, ResourceClass, ResourceRegistry};
use crate::gpu::{shaders, textures, GpuError};
use crate::preset::Preset;

/// GPU objects allocated for one preset runtime: feedback textures, an
/// offscreen framebuffer and, when the preset has a valid shader, its
/// composite program.
#[derive(Debug)]
pub struct PresetTarget {
    pub(crate) id: u64,
    pub(crate) handles: Vec<GpuResourceHandle>,
    pub(crate) shader_fallback: Option<String>,
}

impl PresetTarget {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handles(&self) -> &[GpuResourceHandle] {
        &self.handles
    }

    /// Why the preset's own shader was replaced by the built-in composite.
    pub fn shader_fallback(&self) -> Option<&str> {
        self.shader_fallback.as_deref()
    }
}

/// Everything a backend needs to draw one preset for one frame.
#[derive(Debug, Clone, Copy)]
pub struct PresetFrame<'a> {
    pub params: &'a FrameParams,
    pub mesh: &'a WarpMesh,
    pub waves: &'a [WaveVertex],
}

/// What ends up on the output for this frame.
#[derive(Debug, Clone, Copy)]
pub enum Composite<'a> {
    Single(&'a PresetTarget),
    /// Cross-fade; `weight` is the eased share of `to`.
    Blend {
        from: &'a PresetTarget,
        to: &'a PresetTarget,
        weight: f32,
    },
}

/// Where a finished frame is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputTarget {
    /// The visible-surface stand-in (`render`).
    #[default]
    Surface,
    /// The offscreen output texture (`renderTexture`).
    Texture,
}

/// Device operations used by the render engine.
pub trait RenderBackend: Send {
    fn name(&self) -> &'static str;

    /// Allocate the surface and output targets.
    fn initialize(&mut self, width: u32, height: u32) -> Result<(), GpuError>;

    fn is_initialized(&self) -> bool;

    /// Create the `size × size` gradient that seeds feedback buffers.
    fn seed_texture(&mut self, size: u32) -> Result<(), GpuError>;

    /// Build the built-in pass pipelines.
    fn prepare_shaders(&mut self) -> Result<(), GpuError>;

    /// Reallocate size-dependent surface and output targets.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), GpuError>;

    fn create_preset_target(&mut self, preset: &Preset) -> Result<PresetTarget, GpuError>;

    fn release_preset_target(&mut self, target: PresetTarget);

    /// Run the warp, wave and composite passes of one preset.
    fn draw_preset(&mut self, target: &PresetTarget, frame: &PresetFrame<'_>) -> Result<(), GpuError>;

    fn present(&mut self, composite: Composite<'_>, output: OutputTarget) -> Result<(), GpuError>;

    /// RGBA8 pixels of `output`, row-major, top row first.
    fn read_output(&mut self, output: OutputTarget) -> Result<Vec<u8>, GpuError>;

    /// Release every handle. Idempotent.
    fn release_all(&mut self);

    /// Device operations issued so far.
    fn gpu_calls(&self) -> u64;

    fn live_resources(&self) -> usize;
}

/// Counters shared between a [`NullBackend`] and whoever inspects it.
#[derive(Debug, Default)]
pub struct NullProbe {
    calls: AtomicU64,
    presents: AtomicU64,
    live: AtomicUsize,
}

impl NullProbe {
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn presents(&self) -> u64 {
        self.presents.load(Ordering::Relaxed)
    }

    pub fn live_resources(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

/// Backend without a device. Allocations are handles in a registry and draw
/// calls are counted. Preset shaders are still validated, and sizes are
/// checked against the wgpu default limits.
#[derive(Debug, Default)]
pub struct NullBackend {
    registry: ResourceRegistry,
    surface: Vec<GpuResourceHandle>,
    size: Option<(u32, u32)>,
    seeded: bool,
    shaders_ready: bool,
    next_target: u64,
    probe: Arc<NullProbe>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self) -> Arc<NullProbe> {
        Arc::clone(&self.probe)
    }

    fn call(&self) {
        self.probe.calls.fetch_add(1, Ordering::Relaxed);
    }

    fn sync_live(&self) {
        self.probe.live.store(self.registry.live_count(), Ordering::Relaxed);
    }

    fn allocate_surface(&mut self, width: u32, height: u32) {
        self.surface = vec![
            self.registry.allocate(ResourceClass::Framebuffer, format!("surface {}x{}", width, height)),
            self.registry.allocate(ResourceClass::Texture, format!("output {}x{}", width, height)),
        ];
        self.size = Some((width, height));
        self.sync_live();
    }

    fn check_size(width: u32, height: u32) -> Result<(), GpuError> {
        textures::check_target_size(&wgpu::Limits::default(), width, height)
    }

    fn check_target(&self, target: &PresetTarget) -> Result<(), GpuError> {
        if target.handles.iter().all(|h| self.registry.contains(*h)) {
            Ok(())
        } else {
            Err(GpuError::Texture(format!("preset target {} was released", target.id)))
        }
    }
}

impl RenderBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn initialize(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        if self.size.is_some() {
            return Ok(());
        }
        Self::check_size(width, height)?;
        self.call();
        self.allocate_surface(width, height);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.size.is_some()
    }

    fn seed_texture(&mut self, size: u32) -> Result<(), GpuError> {
        if self.size.is_none() {
            return Err(GpuError::SurfaceMissing);
        }
        if !self.seeded {
            textures::check_texture_size(&wgpu::Limits::default(), size, size)?;
            self.call();
            self.registry
                .allocate(ResourceClass::Texture, format!("seed {}x{}", size, size));
            self.seeded = true;
            self.sync_live();
        }
        Ok(())
    }

    fn prepare_shaders(&mut self) -> Result<(), GpuError> {
        if self.size.is_none() {
            return Err(GpuError::SurfaceMissing);
        }
        if self.shaders_ready {
            return Ok(());
        }
        for (label, source) in [
            ("warp", shaders::WARP),
            ("wave", shaders::WAVE),
            ("blend", shaders::BLEND),
            ("blit", shaders::BLIT),
        ] {
            shaders::validate_wgsl(label, source)?;
            self.call();
            self.registry.allocate(ResourceClass::ShaderProgram, label);
        }
        self.registry.allocate(ResourceClass::ShaderProgram, "composite");
        self.shaders_ready = true;
        self.sync_live();
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        if self.size.is_none() {
            return Err(GpuError::SurfaceMissing);
        }
        Self::check_size(width, height)?;
        self.call();
        for handle in std::mem::take(&mut self.surface) {
            self.registry.release(handle);
        }
        self.allocate_surface(width, height);
        Ok(())
    }

    fn create_preset_target(&mut self, preset: &Preset) -> Result<PresetTarget, GpuError> {
        if self.size.is_none() {
            return Err(GpuError::SurfaceMissing);
        }
        if !self.shaders_ready {
            return Err(GpuError::ShadersMissing);
        }
        self.call();
        self.next_target += 1;
        let name = preset.name();
        let mut handles = vec![
            self.registry.allocate(ResourceClass::Texture, format!("{} feedback a", name)),
            self.registry.allocate(ResourceClass::Texture, format!("{} feedback b", name)),
            self.registry.allocate(ResourceClass::Framebuffer, format!("{} offscreen", name)),
        ];
        for path in preset.textures() {
            handles.push(
                self.registry
                    .allocate(ResourceClass::Texture, path.to_string_lossy()),
            );
        }

        let mut shader_fallback = None;
        if let Some(body) = preset.shader() {
            match shaders::preset_composite_source(name, body) {
                Ok(_) => handles.push(
                    self.registry
                        .allocate(ResourceClass::ShaderProgram, format!("{} composite", name)),
                ),
                Err(e) => shader_fallback = Some(e.to_string()),
            }
        }

        self.sync_live();
        Ok(PresetTarget {
            id: self.next_target,
            handles,
            shader_fallback,
        })
    }

    fn release_preset_target(&mut self, target: PresetTarget) {
        for handle in target.handles {
            self.registry.release(handle);
        }
        self.sync_live();
    }

    fn draw_preset(&mut self, target: &PresetTarget, _frame: &PresetFrame<'_>) -> Result<(), GpuError> {
        self.check_target(target)?;
        // warp, wave, composite
        for _ in 0..3 {
            self.call();
        }
        Ok(())
    }

    fn present(&mut self, composite: Composite<'_>, _output: OutputTarget) -> Result<(), GpuError> {
        if self.size.is_none() {
            return Err(GpuError::SurfaceMissing);
        }
        match composite {
            Composite::Single(target) => self.check_target(target)?,
            Composite::Blend { from, to, .. } => {
                self.check_target(from)?;
                self.check_target(to)?;
                self.call();
            }
        }
        self.call();
        self.probe.presents.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn read_output(&mut self, _output: OutputTarget) -> Result<Vec<u8>, GpuError> {
        let (width, height) = self.size.ok_or(GpuError::SurfaceMissing)?;
        self.call();
        Ok(vec![0; width as usize * height as usize * 4])
    }

    fn release_all(&mut self) {
        let released = self.registry.release_all();
        if released > 0 {
            log::debug!("Null backend released {} handle(s)", released);
        }
        self.surface.clear();
        self.size = None;
        self.seeded = false;
        self.shaders_ready = false;
        self.sync_live();
    }

    fn gpu_calls(&self) -> u64 {
        self.probe.calls()
    }

    fn live_resources(&self) -> usize {
        self.registry.live_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_backend() -> NullBackend {
        let mut backend = NullBackend::new();
        backend.initialize(64, 48).unwrap();
        backend.seed_texture(16).unwrap();
        backend.prepare_shaders().unwrap();
        backend
    }

    #[test]
    fn test_stages_require_surface() {
        let mut backend = NullBackend::new();
        assert!(matches!(backend.seed_texture(16), Err(GpuError::SurfaceMissing)));
        assert!(matches!(backend.prepare_shaders(), Err(GpuError::SurfaceMissing)));
        assert_eq!(backend.gpu_calls(), 0);
    }

    #[test]
    fn test_oversized_resize_keeps_surface() {
        let mut backend = ready_backend();
        let calls = backend.gpu_calls();
        assert!(matches!(backend.resize(40_000, 40_000), Err(GpuError::Texture(_))));
        assert_eq!(backend.gpu_calls(), calls);
        assert_eq!(backend.read_output(OutputTarget::Surface).unwrap().len(), 64 * 48 * 4);

        let mut fresh = NullBackend::new();
        assert!(fresh.initialize(100_000, 10).is_err());
        assert!(!fresh.is_initialized());
        fresh.initialize(8, 8).unwrap();
        assert!(fresh.seed_texture(0).is_err());
    }

    #[test]
    fn test_target_lifecycle() {
        let mut backend = ready_backend();
        let before = backend.live_resources();
        let target = backend
            .create_preset_target(&Preset::builtin_default())
            .unwrap();
        assert_eq!(target.handles().len(), 3);
        assert_eq!(backend.live_resources(), before + 3);

        backend.release_preset_target(target);
        assert_eq!(backend.live_resources(), before);
    }

    #[test]
    fn test_invalid_preset_shader_falls_back() {
        let mut backend = ready_backend();
        let preset = crate::preset::PresetStore::default()
            .load_str("bad", "shader_1=return nope;")
            .unwrap();
        let target = backend.create_preset_target(&preset).unwrap();
        assert!(target.shader_fallback().is_some());
        assert_eq!(target.handles().len(), 3);
    }

    #[test]
    fn test_released_target_rejected() {
        let mut backend = ready_backend();
        let target = backend
            .create_preset_target(&Preset::builtin_default())
            .unwrap();
        backend.resize(32, 32).unwrap();
        assert!(backend.present(Composite::Single(&target), OutputTarget::Surface).is_ok());

        backend.release_all();
        assert!(backend.present(Composite::Single(&target), OutputTarget::Surface).is_err());
        assert_eq!(backend.live_resources(), 0);
        assert_eq!(backend.probe().live_resources(), 0);
    }

    #[test]
    fn test_read_output_size() {
        let mut backend = ready_backend();
        assert_eq!(backend.read_output(OutputTarget::Texture).unwrap().len(), 64 * 48 * 4);
    }
}
