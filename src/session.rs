//! Session lifecycle.
//!
//! A [`Session`] owns one audio ingest, one preset store and one render
//! engine, and enforces the order in which they come up and go down:
//!
//! ```text
//! Uninitialized --open--> Ready --render--> Rendering --close--> Closing --> Closed
//! ```
//!
//! The session itself lives on the render cadence. Other cadences get a
//! [`SessionHandle`] to push audio and stage presets; the handle observes
//! the same state word, so a close is seen on the next push or load.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;

use crate::audio::{AnalyzerError, AudioFrame, AudioIngest, IngestStats};
use crate::config::{BackendKind, ConfigError, EngineConfig};
use crate::gpu::{GpuError, WgpuBackend};
use crate::preset::{Preset, PresetError, PresetSource, PresetStore};
use crate::render::{FrameStats, NullBackend, OutputTarget, RenderBackend, RenderEngine, RenderError};

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[repr(u8)]
pub enum SessionState {
    Uninitialized = 0,
    Ready = 1,
    Rendering = 2,
    Closing = 3,
    Closed = 4,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Uninitialized,
            1 => SessionState::Ready,
            2 => SessionState::Rendering,
            3 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    /// Whether frames may be rendered and presets or audio accepted.
    pub fn is_live(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Rendering)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Ready => "ready",
            SessionState::Rendering => "rendering",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{operation} is not allowed while the session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
    #[error("{operation} requires {requires} to run first")]
    MissingStage {
        operation: &'static str,
        requires: &'static str,
    },
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Preset(#[from] PresetError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Audio(#[from] AnalyzerError),
}

/// Shared state word. Transitions go through compare-and-swap so the
/// control cadence never overwrites a close.
#[derive(Debug, Default)]
struct StateCell(AtomicU8);

impl StateCell {
    fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Cloneable access to a session from the audio and control cadences.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<StateCell>,
    store: Arc<PresetStore>,
    ingest: Arc<ArcSwapOption<AudioIngest>>,
    transition: Duration,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    pub fn store(&self) -> &Arc<PresetStore> {
        &self.store
    }

    fn require_live(&self, operation: &'static str) -> Result<(), SessionError> {
        let state = self.state.get();
        if state.is_live() {
            Ok(())
        } else {
            Err(SessionError::InvalidState { operation, state })
        }
    }

    /// Parse `source` and stage it behind the configured cross-fade.
    ///
    /// Parsing may hit the disk; never call this from the render cadence.
    /// On error the active preset is untouched.
    pub fn load_preset(&self, source: &PresetSource) -> Result<Arc<Preset>, SessionError> {
        self.load_preset_with(source, self.transition)
    }

    pub fn load_preset_with(&self, source: &PresetSource, transition: Duration) -> Result<Arc<Preset>, SessionError> {
        self.require_live("load_preset")?;
        let preset = self.store.load(source).inspect_err(|e| {
            log::warn!("Rejected preset {:?}: {}", source, e);
        })?;
        // the session may have closed while we were parsing
        self.require_live("load_preset")?;
        self.store.activate(Arc::clone(&preset), transition);
        Ok(preset)
    }

    /// Feed interleaved PCM. Returns `false` when the block was dropped or
    /// the session is not accepting audio.
    pub fn push_audio(&self, samples: &[f32]) -> bool {
        if !self.state.get().is_live() {
            return false;
        }
        match &*self.ingest.load() {
            Some(ingest) => ingest.push(samples),
            None => false,
        }
    }

    pub fn ingest_stats(&self) -> Option<IngestStats> {
        self.ingest.load_full().map(|ingest| ingest.stats())
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Stages {
    surface: bool,
    texture: bool,
    shaders: bool,
}

/// One visualization session. Owned by the render cadence.
pub struct Session {
    config: EngineConfig,
    handle: SessionHandle,
    pending_backend: Option<Box<dyn RenderBackend>>,
    engine: Option<RenderEngine>,
    stages: Stages,
    last_render: Option<Instant>,
}

impl Session {
    /// Create a session that builds its backend from `config.backend`.
    pub fn new(config: EngineConfig) -> Result<Self, SessionError> {
        config.validate()?;
        let handle = SessionHandle {
            state: Arc::new(StateCell::default()),
            store: Arc::new(PresetStore::default()),
            ingest: Arc::new(ArcSwapOption::empty()),
            transition: Duration::from_millis(config.transition_ms),
        };
        Ok(Self {
            config,
            handle,
            pending_backend: None,
            engine: None,
            stages: Stages::default(),
            last_render: None,
        })
    }

    /// Create a session around a caller-provided backend.
    pub fn with_backend(config: EngineConfig, backend: Box<dyn RenderBackend>) -> Result<Self, SessionError> {
        let mut session = Self::new(config)?;
        session.pending_backend = Some(backend);
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<PresetStore> {
        &self.handle.store
    }

    pub fn engine(&self) -> Option<&RenderEngine> {
        self.engine.as_ref()
    }

    /// Device operations issued so far; zero before the surface exists.
    pub fn gpu_calls(&self) -> u64 {
        self.engine.as_ref().map_or(0, |e| e.backend().gpu_calls())
    }

    pub fn ingest_stats(&self) -> Option<IngestStats> {
        self.handle.ingest_stats()
    }

    fn require_uninitialized(&self, operation: &'static str) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Uninitialized => Ok(()),
            state => Err(SessionError::InvalidState { operation, state }),
        }
    }

    fn engine_mut(&mut self, operation: &'static str) -> Result<&mut RenderEngine, SessionError> {
        match self.engine.as_mut() {
            Some(engine) if self.stages.surface => Ok(engine),
            _ => Err(SessionError::MissingStage {
                operation,
                requires: "init_gl_window",
            }),
        }
    }

    fn make_backend(&mut self) -> Result<Box<dyn RenderBackend>, SessionError> {
        if let Some(backend) = self.pending_backend.take() {
            return Ok(backend);
        }
        Ok(match self.config.backend {
            BackendKind::Wgpu => Box::new(WgpuBackend::new()?),
            BackendKind::Null => Box::new(NullBackend::new()),
        })
    }

    /// Create the rendering surface.
    pub fn init_surface(&mut self) -> Result<(), SessionError> {
        if self.state().is_live() {
            return Ok(());
        }
        self.require_uninitialized("init_gl_window")?;
        if self.stages.surface {
            return Ok(());
        }
        let mut engine = match self.engine.take() {
            Some(engine) => engine,
            None => RenderEngine::new(self.make_backend()?, &self.config),
        };
        let result = engine.initialize(self.config.width, self.config.height);
        self.engine = Some(engine);
        result?;
        self.stages.surface = true;
        Ok(())
    }

    /// Create the seed texture of `size × size` pixels.
    pub fn init_texture(&mut self, size: u32) -> Result<(), SessionError> {
        if self.state().is_live() {
            return Ok(());
        }
        self.require_uninitialized("init_texture")?;
        self.engine_mut("init_texture")?.seed_texture(size)?;
        self.stages.texture = true;
        Ok(())
    }

    /// Build the render pipelines.
    pub fn init_shaders(&mut self) -> Result<(), SessionError> {
        if self.state().is_live() {
            return Ok(());
        }
        self.require_uninitialized("init_shaders")?;
        self.engine_mut("init_shaders")?.prepare_shaders()?;
        self.stages.shaders = true;
        Ok(())
    }

    /// Start audio ingestion and activate the first preset. Requires the
    /// surface, texture and shader stages.
    pub fn init_engine(&mut self) -> Result<(), SessionError> {
        if self.state().is_live() {
            return Ok(());
        }
        self.require_uninitialized("init_engine")?;
        for (done, requires) in [
            (self.stages.surface, "init_gl_window"),
            (self.stages.texture, "init_texture"),
            (self.stages.shaders, "init_shaders"),
        ] {
            if !done {
                return Err(SessionError::MissingStage {
                    operation: "init_engine",
                    requires,
                });
            }
        }

        let first = match &self.config.default_preset {
            Some(path) => match self.handle.store.load_path(path) {
                Ok(preset) => preset,
                Err(e) => {
                    log::warn!("Default preset {} unusable, using built-in: {}", path.display(), e);
                    Arc::new(Preset::builtin_default())
                }
            },
            None => Arc::new(Preset::builtin_default()),
        };

        let ingest = AudioIngest::new(&self.config)?;
        self.handle.ingest.store(Some(Arc::new(ingest)));

        // nothing to fade from yet, so the first preset is active at once
        let store = &self.handle.store;
        store.promote(&first);
        store.activate(first, Duration::from_millis(self.config.default_transition_ms));

        self.handle.state.set(SessionState::Ready);
        log::info!(
            "Session ready: {}x{} @ {} fps, preset '{}'",
            self.config.width,
            self.config.height,
            self.config.fps,
            self.handle.store.active().map(|p| p.name().to_string()).unwrap_or_default()
        );
        Ok(())
    }

    /// Run every initialization stage not yet done.
    ///
    /// A second `open` on a live session is a no-op. A closing or closed
    /// session cannot be reopened.
    pub fn open(&mut self) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Ready | SessionState::Rendering => return Ok(()),
            SessionState::Closing | SessionState::Closed => {
                return Err(SessionError::InvalidState {
                    operation: "open",
                    state: self.state(),
                })
            }
            SessionState::Uninitialized => {}
        }
        self.init_surface()?;
        self.init_texture(self.config.texture_size)?;
        self.init_shaders()?;
        self.init_engine()
    }

    /// Render one frame to the surface, timed against the previous call.
    pub fn render(&mut self) -> Result<FrameStats, SessionError> {
        let dt = self.elapsed();
        self.render_with_delta(dt, OutputTarget::Surface)
    }

    /// Render one frame to the offscreen output texture.
    pub fn render_texture(&mut self) -> Result<FrameStats, SessionError> {
        let dt = self.elapsed();
        self.render_with_delta(dt, OutputTarget::Texture)
    }

    fn elapsed(&mut self) -> Duration {
        let now = Instant::now();
        let dt = self
            .last_render
            .map_or_else(|| self.config.frame_interval(), |last| now.duration_since(last));
        self.last_render = Some(now);
        dt
    }

    /// Render one frame with an explicit frame interval.
    pub fn render_with_delta(&mut self, dt: Duration, output: OutputTarget) -> Result<FrameStats, SessionError> {
        let state = self.state();
        if !state.is_live() {
            return Err(SessionError::InvalidState {
                operation: "render",
                state,
            });
        }

        let audio = match self.handle.ingest.load_full() {
            Some(ingest) => {
                if !self.config.analysis_thread {
                    ingest.process_pending();
                }
                ingest.latest()
            }
            None => Arc::new(AudioFrame::silent(
                self.config.fft_size,
                self.config.channels,
                self.config.sample_rate,
            )),
        };

        let store = Arc::clone(&self.handle.store);
        let engine = self.engine_mut("render")?;
        let stats = engine.render_frame(&audio, &store, dt, output)?;
        self.handle
            .state
            .transition(SessionState::Ready, SessionState::Rendering);
        Ok(stats)
    }

    /// Resize the surface. Preset state and any cross-fade survive.
    pub fn reshape(&mut self, width: u32, height: u32) -> Result<(), SessionError> {
        let state = self.state();
        if matches!(state, SessionState::Closing | SessionState::Closed) {
            return Err(SessionError::InvalidState {
                operation: "reshape",
                state,
            });
        }
        self.engine_mut("reshape")?.reshape(width, height)?;
        self.config.width = width;
        self.config.height = height;
        Ok(())
    }

    /// RGBA8 pixels of the last presented frame.
    pub fn read_pixels(&mut self, output: OutputTarget) -> Result<Vec<u8>, SessionError> {
        let state = self.state();
        if !state.is_live() {
            return Err(SessionError::InvalidState {
                operation: "read_pixels",
                state,
            });
        }
        Ok(self.engine_mut("read_pixels")?.read_output(output)?)
    }

    fn begin_closing(&self) {
        let cell = &self.handle.state;
        if !cell.transition(SessionState::Ready, SessionState::Closing) {
            cell.transition(SessionState::Rendering, SessionState::Closing);
        }
    }

    fn finish_if_released(&self) {
        if self.state() == SessionState::Closing && self.handle.ingest.load().is_none() && self.engine.is_none() {
            self.handle.state.set(SessionState::Closed);
            log::info!("Session closed");
        }
    }

    /// Stop audio ingestion. Idempotent.
    pub fn destroy_audio(&mut self) {
        self.begin_closing();
        if let Some(ingest) = self.handle.ingest.swap(None) {
            ingest.stop();
        }
        self.finish_if_released();
    }

    /// Release GPU resources. Idempotent.
    pub fn destroy_gl(&mut self) {
        self.begin_closing();
        if let Some(engine) = self.engine.as_mut() {
            engine.destroy();
        }
        self.stages = Stages::default();
        self.finish_if_released();
    }

    /// Drop the render engine and the preset slots. Idempotent.
    pub fn destroy_engine(&mut self) {
        self.begin_closing();
        if let Some(mut engine) = self.engine.take() {
            engine.destroy();
        }
        self.stages = Stages::default();
        self.handle.store.clear();
        self.finish_if_released();
    }

    /// Tear everything down: audio first, then GPU resources, then the
    /// engine. Idempotent; `Closed` is terminal.
    pub fn close(&mut self) {
        match self.state() {
            SessionState::Closed => return,
            SessionState::Uninitialized => {
                self.handle.state.set(SessionState::Closing);
            }
            _ => self.begin_closing(),
        }
        self.destroy_audio();
        self.destroy_gl();
        self.destroy_engine();
        self.pending_backend = None;
        self.handle.state.set(SessionState::Closed);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
