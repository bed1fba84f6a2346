//! The render engine.
//!
//! [`RenderEngine::render_frame`] is called once per display frame. It picks
//! up pending preset activations, evaluates the active preset (or both sides
//! of a cross-fade) against the latest audio frame, and drives the
//! [`RenderBackend`]. Faults in presets or the backend degrade the affected
//! preset and are logged once; they never surface as frame errors.

pub mod backend;
pub mod state;
pub mod transition;
pub mod waveform;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

pub use backend::{
    Composite, NullBackend, NullProbe, OutputTarget, PresetFrame, PresetTarget, RenderBackend,
};
pub use state::{FrameInputs, FrameParams, PresetRuntime, WarpMesh, WarpVertex, WaveMode};
pub use transition::{ease, PresetTransition};
pub use waveform::{build_custom_wave, build_waveform, Viewport, WaveVertex};

use crate::audio::AudioFrame;
use crate::config::EngineConfig;
use crate::gpu::GpuError;
use crate::preset::{Preset, PresetStore};

/// Errors returned by [`RenderEngine`] entry points.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Render engine is {0}")]
    InvalidState(&'static str),
    #[error("No preset is active")]
    NoActivePreset,
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

/// What happened during one `render_frame`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameStats {
    pub frame: u64,
    /// Seconds of render time, the `time` preset input.
    pub time: f64,
    /// Sequence number of the audio frame used.
    pub audio_sequence: u64,
    /// No new audio arrived since the previous frame.
    pub audio_stale: bool,
    /// Linear transition progress, while a cross-fade is running.
    pub transition_progress: Option<f32>,
    /// Eased share of the incoming preset, while a cross-fade is running.
    pub blend_weight: Option<f32>,
    /// Any preset drawn this frame is degraded.
    pub degraded: bool,
    /// Whether the backend presented a new image.
    pub presented: bool,
}

/// Owns the backend and the per-preset runtimes.
pub struct RenderEngine {
    backend: Box<dyn RenderBackend>,
    mesh_size: (u32, u32),
    fps: f64,
    size: (u32, u32),
    active: Option<PresetRuntime>,
    transition: Option<PresetTransition>,
    time: f64,
    frame: u64,
    last_audio_sequence: Option<u64>,
    degraded_presets: u64,
    wave_scratch: Vec<WaveVertex>,
}

impl RenderEngine {
    /// Wrap `backend`. No device work happens until [`initialize`](Self::initialize).
    pub fn new(backend: Box<dyn RenderBackend>, config: &EngineConfig) -> Self {
        Self {
            backend,
            mesh_size: (config.mesh_width, config.mesh_height),
            fps: config.fps as f64,
            size: (config.width, config.height),
            active: None,
            transition: None,
            time: 0.0,
            frame: 0,
            last_audio_sequence: None,
            degraded_presets: 0,
            wave_scratch: Vec::new(),
        }
    }

    /// Allocate the surface-sized targets.
    pub fn initialize(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        self.backend.initialize(width, height)?;
        self.size = (width, height);
        log::info!(
            "Render engine initialized on {} backend at {}x{}",
            self.backend.name(),
            width,
            height
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_initialized()
    }

    pub fn seed_texture(&mut self, size: u32) -> Result<(), RenderError> {
        Ok(self.backend.seed_texture(size)?)
    }

    pub fn prepare_shaders(&mut self) -> Result<(), RenderError> {
        Ok(self.backend.prepare_shaders()?)
    }

    pub fn backend(&self) -> &dyn RenderBackend {
        self.backend.as_ref()
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// The single active runtime, when no cross-fade is running.
    pub fn active(&self) -> Option<&PresetRuntime> {
        self.active.as_ref()
    }

    pub fn transition(&self) -> Option<&PresetTransition> {
        self.transition.as_ref()
    }

    /// The preset that is or is becoming visible.
    pub fn current_preset(&self) -> Option<&Arc<Preset>> {
        match (&self.transition, &self.active) {
            (Some(t), _) => Some(t.incoming().preset()),
            (None, Some(rt)) => Some(rt.preset()),
            (None, None) => None,
        }
    }

    /// Number of preset runtimes that have been marked degraded.
    pub fn degraded_presets(&self) -> u64 {
        self.degraded_presets
    }

    fn release_runtime(&mut self, mut runtime: PresetRuntime) {
        if let Some(target) = runtime.target.take() {
            self.backend.release_preset_target(target);
        }
    }

    fn new_runtime(&self, preset: Arc<Preset>) -> PresetRuntime {
        PresetRuntime::new(preset, self.mesh_size.0, self.mesh_size.1)
    }

    /// Pick up an activation staged in `store`.
    fn apply_pending(&mut self, store: &PresetStore) {
        let Some(pending) = store.take_pending() else {
            return;
        };
        let incoming = self.new_runtime(Arc::clone(&pending.preset));

        if pending.duration.is_zero() {
            if let Some(t) = self.transition.take() {
                let (outgoing, previous) = t.into_parts();
                self.release_runtime(outgoing);
                self.release_runtime(previous);
            }
            if let Some(active) = self.active.take() {
                self.release_runtime(active);
            }
            log::debug!("Switched to preset '{}'", pending.preset.name());
            self.active = Some(incoming);
            return;
        }

        // A newer activation wins: the running cross-fade completes at once
        // and the new one starts from its incoming preset.
        let current = match self.transition.take() {
            Some(t) => {
                let (outgoing, incoming) = t.into_parts();
                self.release_runtime(outgoing);
                store.promote(incoming.preset());
                Some(incoming)
            }
            None => self.active.take(),
        };

        match current {
            Some(current) => {
                log::debug!(
                    "Cross-fading '{}' -> '{}' over {} ms",
                    current.preset().name(),
                    pending.preset.name(),
                    pending.duration.as_millis()
                );
                self.transition = Some(PresetTransition::new(current, incoming, pending.duration));
            }
            None => {
                store.promote(&pending.preset);
                self.active = Some(incoming);
            }
        }
    }

    /// Evaluate one runtime and draw it into its target, creating the target
    /// on first use. Returns whether the runtime has a drawable target.
    fn draw_runtime(
        backend: &mut dyn RenderBackend,
        runtime: &mut PresetRuntime,
        inputs: &FrameInputs,
        audio: &AudioFrame,
        viewport: Viewport,
        waves: &mut Vec<WaveVertex>,
        degraded_presets: &mut u64,
    ) -> bool {
        let was_degraded = runtime.is_degraded();

        let params = *runtime.evaluate(inputs);

        if runtime.target.is_none() && !runtime.target_failed {
            match backend.create_preset_target(runtime.preset()) {
                Ok(target) => {
                    if let Some(reason) = target.shader_fallback() {
                        runtime.mark_degraded(format!("shader replaced by built-in composite: {}", reason));
                    }
                    runtime.target = Some(target);
                }
                Err(e) => {
                    runtime.target_failed = true;
                    runtime.mark_degraded(format!("could not allocate GPU resources: {}", e));
                }
            }
        }

        let mut drawable = false;
        if let Some(target) = runtime.target.as_ref() {
            waves.clear();
            build_waveform(waves, audio, &params, viewport);
            for wave in runtime.preset().custom_waves() {
                build_custom_wave(waves, audio, wave, viewport);
            }
            let frame = PresetFrame {
                params: &params,
                mesh: runtime.mesh(),
                waves: waves.as_slice(),
            };
            match backend.draw_preset(target, &frame) {
                Ok(()) => drawable = true,
                Err(e) => {
                    runtime.mark_degraded(format!("draw failed: {}", e));
                }
            }
        }

        if !was_degraded && runtime.is_degraded() {
            *degraded_presets += 1;
        }
        drawable
    }

    /// Render one frame from `audio` and the presets staged in `store`.
    ///
    /// `dt` is the time since the previous frame; it advances preset time
    /// and any running cross-fade.
    pub fn render_frame(
        &mut self,
        audio: &AudioFrame,
        store: &PresetStore,
        dt: Duration,
        output: OutputTarget,
    ) -> Result<FrameStats, RenderError> {
        if !self.backend.is_initialized() {
            return Err(RenderError::InvalidState("not initialized"));
        }

        self.apply_pending(store);
        if self.active.is_none() && self.transition.is_none() {
            let preset = store.active().ok_or(RenderError::NoActivePreset)?;
            self.active = Some(self.new_runtime(preset));
        }

        self.time += dt.as_secs_f64();
        let audio_stale = self.last_audio_sequence == Some(audio.sequence);
        self.last_audio_sequence = Some(audio.sequence);

        let mut inputs = FrameInputs::new(audio, self.time, self.frame, self.fps);
        if audio_stale {
            // the same window must not retrigger a beat on every frame
            inputs.beat = 0.0;
        }

        let viewport = Viewport {
            width: self.size.0,
            height: self.size.1,
        };
        let mut stats = FrameStats {
            frame: self.frame,
            time: self.time,
            audio_sequence: audio.sequence,
            audio_stale,
            ..FrameStats::default()
        };

        let backend = self.backend.as_mut();
        let composite_result = if let Some(transition) = self.transition.as_mut() {
            transition.advance(dt);
            let weight = transition.weight();
            stats.transition_progress = Some(transition.progress());
            stats.blend_weight = Some(weight);

            let out_ok = Self::draw_runtime(
                backend,
                &mut transition.outgoing,
                &inputs,
                audio,
                viewport,
                &mut self.wave_scratch,
                &mut self.degraded_presets,
            );
            let in_ok = Self::draw_runtime(
                backend,
                &mut transition.incoming,
                &inputs,
                audio,
                viewport,
                &mut self.wave_scratch,
                &mut self.degraded_presets,
            );
            stats.degraded = transition.outgoing.is_degraded() || transition.incoming.is_degraded();

            let composite = match (
                transition.outgoing.target.as_ref().filter(|_| out_ok),
                transition.incoming.target.as_ref().filter(|_| in_ok),
            ) {
                (Some(from), Some(to)) => Some(Composite::Blend { from, to, weight }),
                (Some(only), None) | (None, Some(only)) => Some(Composite::Single(only)),
                (None, None) => None,
            };
            composite.map(|c| backend.present(c, output))
        } else if let Some(runtime) = self.active.as_mut() {
            let ok = Self::draw_runtime(
                backend,
                runtime,
                &inputs,
                audio,
                viewport,
                &mut self.wave_scratch,
                &mut self.degraded_presets,
            );
            stats.degraded = runtime.is_degraded();
            runtime
                .target
                .as_ref()
                .filter(|_| ok)
                .map(|target| backend.present(Composite::Single(target), output))
        } else {
            None
        };

        match composite_result {
            Some(Ok(())) => stats.presented = true,
            Some(Err(e)) => log::warn!("Present failed, keeping previous image: {}", e),
            None => {}
        }

        if self.transition.as_ref().is_some_and(PresetTransition::is_complete) {
            if let Some(t) = self.transition.take() {
                let (outgoing, incoming) = t.into_parts();
                log::debug!("Transition to '{}' complete", incoming.preset().name());
                self.release_runtime(outgoing);
                store.promote(incoming.preset());
                self.active = Some(incoming);
            }
        }

        self.frame += 1;
        Ok(stats)
    }

    /// Reallocate size-dependent resources. Preset variable state and any
    /// running cross-fade carry over; preset targets are recreated lazily
    /// at the new size.
    pub fn reshape(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if !self.backend.is_initialized() {
            return Err(RenderError::InvalidState("not initialized"));
        }
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidState("asked for an empty surface"));
        }
        self.backend.resize(width, height)?;
        self.size = (width, height);

        let mut targets = Vec::new();
        if let Some(rt) = self.active.as_mut() {
            targets.extend(rt.target.take());
        }
        if let Some(t) = self.transition.as_mut() {
            targets.extend(t.outgoing.target.take());
            targets.extend(t.incoming.target.take());
        }
        for target in targets {
            self.backend.release_preset_target(target);
        }
        log::debug!("Reshaped to {}x{}", width, height);
        Ok(())
    }

    /// Copy the last presented image back as RGBA8.
    pub fn read_output(&mut self, output: OutputTarget) -> Result<Vec<u8>, RenderError> {
        if !self.backend.is_initialized() {
            return Err(RenderError::InvalidState("not initialized"));
        }
        Ok(self.backend.read_output(output)?)
    }

    /// Release every GPU resource. Safe to call repeatedly.
    pub fn destroy(&mut self) {
        if let Some(t) = self.transition.take() {
            let (outgoing, incoming) = t.into_parts();
            self.release_runtime(outgoing);
            self.release_runtime(incoming);
        }
        if let Some(active) = self.active.take() {
            self.release_runtime(active);
        }
        if self.backend.is_initialized() || self.backend.live_resources() > 0 {
            self.backend.release_all();
            log::info!("Render engine destroyed");
        }
    }
}

impl Drop for RenderEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (RenderEngine, Arc<NullProbe>) {
        let backend = NullBackend::new();
        let probe = backend.probe();
        let mut engine = RenderEngine::new(Box::new(backend), &EngineConfig::default());
        engine.initialize(64, 48).unwrap();
        engine.seed_texture(16).unwrap();
        engine.prepare_shaders().unwrap();
        (engine, probe)
    }

    fn silent() -> AudioFrame {
        AudioFrame::silent(512, 2, 44100)
    }

    const FRAME: Duration = Duration::from_millis(16);

    #[test]
    fn test_render_requires_initialize() {
        let mut engine = RenderEngine::new(Box::new(NullBackend::new()), &EngineConfig::default());
        let store = PresetStore::default();
        let err = engine
            .render_frame(&silent(), &store, FRAME, OutputTarget::Surface)
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidState(_)));
    }

    #[test]
    fn test_no_active_preset() {
        let (mut engine, _) = engine();
        let store = PresetStore::default();
        assert!(matches!(
            engine.render_frame(&silent(), &store, FRAME, OutputTarget::Surface),
            Err(RenderError::NoActivePreset)
        ));
    }

    #[test]
    fn test_target_allocated_on_first_frame() {
        let (mut engine, probe) = engine();
        let store = PresetStore::default();
        store.activate(Arc::new(Preset::builtin_default()), Duration::ZERO);
        let live = probe.live_resources();

        let stats = engine
            .render_frame(&silent(), &store, FRAME, OutputTarget::Surface)
            .unwrap();
        assert!(stats.presented);
        assert!(probe.live_resources() > live);
        assert_eq!(probe.presents(), 1);
    }

    #[test]
    fn test_stale_audio_is_reported() {
        let (mut engine, _) = engine();
        let store = PresetStore::default();
        store.activate(Arc::new(Preset::builtin_default()), Duration::ZERO);
        let audio = silent();
        let first = engine.render_frame(&audio, &store, FRAME, OutputTarget::Surface).unwrap();
        let second = engine.render_frame(&audio, &store, FRAME, OutputTarget::Surface).unwrap();
        assert!(!first.audio_stale);
        assert!(second.audio_stale);
    }

    #[test]
    fn test_newer_activation_finishes_running_transition() {
        let (mut engine, _) = engine();
        let store = PresetStore::default();
        let a = store.load_str("a", "").unwrap();
        let b = store.load_str("b", "").unwrap();
        let c = store.load_str("c", "").unwrap();
        store.activate(a, Duration::ZERO);
        engine.render_frame(&silent(), &store, FRAME, OutputTarget::Surface).unwrap();

        store.activate(b, Duration::from_millis(500));
        engine.render_frame(&silent(), &store, FRAME, OutputTarget::Surface).unwrap();
        assert_eq!(engine.transition().unwrap().incoming().preset().name(), "b");

        store.activate(c, Duration::from_millis(500));
        let stats = engine.render_frame(&silent(), &store, FRAME, OutputTarget::Surface).unwrap();
        let t = engine.transition().unwrap();
        assert_eq!(t.outgoing().preset().name(), "b");
        assert_eq!(t.incoming().preset().name(), "c");
        assert_eq!(store.active().unwrap().name(), "b");
        assert!(stats.blend_weight.unwrap() < 0.1);
    }

    #[test]
    fn test_degraded_preset_keeps_rendering() {
        let (mut engine, probe) = engine();
        let store = PresetStore::default();
        let broken = store.load_str("broken", "per_frame_1=zoom = 1 / 0;").unwrap();
        store.activate(broken, Duration::ZERO);

        for _ in 0..5 {
            let stats = engine
                .render_frame(&silent(), &store, FRAME, OutputTarget::Surface)
                .unwrap();
            assert!(stats.degraded);
            assert!(stats.presented);
        }
        assert_eq!(engine.degraded_presets(), 1);
        assert_eq!(probe.presents(), 5);
    }

    #[test]
    fn test_bad_shader_degrades_but_presents() {
        let (mut engine, _) = engine();
        let store = PresetStore::default();
        let preset = store.load_str("shady", "shader_1=return undefined_thing;").unwrap();
        store.activate(preset, Duration::ZERO);
        let stats = engine
            .render_frame(&silent(), &store, FRAME, OutputTarget::Texture)
            .unwrap();
        assert!(stats.degraded);
        assert!(stats.presented);
        let reason = engine.active().unwrap().degraded_reason().unwrap();
        assert!(reason.contains("shader"), "{}", reason);
    }

    #[test]
    fn test_reshape_recreates_targets_and_keeps_state() {
        let (mut engine, probe) = engine();
        let store = PresetStore::default();
        let preset = store.load_str("count", "per_frame_1=n = n + 1;").unwrap();
        store.activate(preset, Duration::ZERO);
        for _ in 0..3 {
            engine.render_frame(&silent(), &store, FRAME, OutputTarget::Surface).unwrap();
        }

        engine.reshape(128, 96).unwrap();
        assert_eq!(engine.size(), (128, 96));
        engine.render_frame(&silent(), &store, FRAME, OutputTarget::Surface).unwrap();
        assert_eq!(engine.active().unwrap().value("n"), Some(4.0));
        assert_eq!(engine.read_output(OutputTarget::Surface).unwrap().len(), 128 * 96 * 4);
        assert!(probe.live_resources() > 0);
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (mut engine, probe) = engine();
        let store = PresetStore::default();
        store.activate(Arc::new(Preset::builtin_default()), Duration::ZERO);
        engine.render_frame(&silent(), &store, FRAME, OutputTarget::Surface).unwrap();

        engine.destroy();
        assert_eq!(probe.live_resources(), 0);
        let calls = probe.calls();
        engine.destroy();
        assert_eq!(probe.calls(), calls);
        assert!(!engine.is_initialized());
    }
}
