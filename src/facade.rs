//! Host-facing facade.
//!
//! Hosts see booleans, not errors: every call reports success or failure
//! and the most recent failure can be fetched with
//! [`VisualizerApi::last_error`]. Nothing here panics on misuse.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::EngineConfig;
use crate::preset::{PresetError, PresetSource};
use crate::render::{OutputTarget, RenderBackend, RenderError};
use crate::session::{Session, SessionError, SessionHandle, SessionState};

/// Category of a failed host call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    GpuInit,
    Parse,
    UnsupportedFeature,
    InvalidState,
    Io,
    Config,
    Audio,
}

/// Last failure recorded by the facade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&SessionError> for ErrorReport {
    fn from(error: &SessionError) -> Self {
        let kind = match error {
            SessionError::InvalidState { .. } | SessionError::MissingStage { .. } => ErrorKind::InvalidState,
            SessionError::Gpu(_) => ErrorKind::GpuInit,
            SessionError::Render(RenderError::Gpu(_)) => ErrorKind::GpuInit,
            SessionError::Render(_) => ErrorKind::InvalidState,
            SessionError::Preset(PresetError::Parse(_)) => ErrorKind::Parse,
            SessionError::Preset(PresetError::UnsupportedFeature { .. }) => ErrorKind::UnsupportedFeature,
            SessionError::Preset(PresetError::Io { .. }) => ErrorKind::Io,
            SessionError::Config(_) => ErrorKind::Config,
            SessionError::Audio(_) => ErrorKind::Audio,
        };
        Self {
            kind,
            message: error.to_string(),
        }
    }
}

/// Counters for host dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub frames_rendered: u64,
    pub audio_frames: u64,
    pub dropped_blocks: u64,
    pub degraded_presets: u64,
    pub transition_progress: Option<f32>,
}

/// Operations a host binding forwards to the engine.
pub trait VisualizerApi {
    fn open(&mut self) -> bool;
    fn close(&mut self);
    fn init_gl_window(&mut self) -> bool;
    fn init_texture(&mut self, size: u32) -> bool;
    fn init_shaders(&mut self) -> bool;
    fn init_engine(&mut self) -> bool;
    /// `true` when the preset parsed and its transition is staged.
    fn load_preset(&mut self, path: &str) -> bool;
    fn render(&mut self) -> bool;
    fn render_texture(&mut self) -> bool;
    fn reshape(&mut self, width: u32, height: u32) -> bool;
    fn destroy_audio(&mut self);
    fn destroy_gl(&mut self);
    fn destroy_engine(&mut self);
    /// `false` when the block was dropped.
    fn add_audio(&self, samples: &[f32]) -> bool;
    fn last_error(&self) -> Option<ErrorReport>;
}

/// Boolean-returning wrapper around one [`Session`].
pub struct Visualizer {
    session: Session,
    handle: SessionHandle,
    last_error: Option<ErrorReport>,
}

impl Visualizer {
    pub fn new(config: EngineConfig) -> Result<Self, SessionError> {
        Ok(Self::from_session(Session::new(config)?))
    }

    pub fn with_backend(config: EngineConfig, backend: Box<dyn RenderBackend>) -> Result<Self, SessionError> {
        Ok(Self::from_session(Session::with_backend(config, backend)?))
    }

    pub fn from_session(session: Session) -> Self {
        let handle = session.handle();
        Self {
            session,
            handle,
            last_error: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Handle for audio and control threads.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    fn record<T>(&mut self, result: Result<T, SessionError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                log::debug!("Host call failed: {}", e);
                self.last_error = Some(ErrorReport::from(&e));
                None
            }
        }
    }

    /// Stage an inline preset. Same contract as `load_preset`.
    pub fn load_preset_str(&mut self, name: &str, text: &str) -> bool {
        let source = PresetSource::Inline {
            name: name.to_string(),
            text: text.to_string(),
        };
        let result = self.handle.load_preset(&source);
        self.record(result).is_some()
    }

    /// RGBA8 pixels of the last frame rendered to the surface.
    pub fn read_pixels(&mut self) -> Option<Vec<u8>> {
        let result = self.session.read_pixels(OutputTarget::Surface);
        self.record(result)
    }

    /// RGBA8 pixels of the offscreen output texture.
    pub fn read_texture(&mut self) -> Option<Vec<u8>> {
        let result = self.session.read_pixels(OutputTarget::Texture);
        self.record(result)
    }

    pub fn stats(&self) -> EngineStats {
        let ingest = self.session.ingest_stats().unwrap_or_default();
        let engine = self.session.engine();
        EngineStats {
            frames_rendered: engine.map_or(0, |e| e.frame_count()),
            audio_frames: ingest.frames,
            dropped_blocks: ingest.dropped_blocks,
            degraded_presets: engine.map_or(0, |e| e.degraded_presets()),
            transition_progress: engine.and_then(|e| e.transition()).map(|t| t.progress()),
        }
    }
}

impl VisualizerApi for Visualizer {
    fn open(&mut self) -> bool {
        let result = self.session.open();
        self.record(result).is_some()
    }

    fn close(&mut self) {
        self.session.close();
    }

    fn init_gl_window(&mut self) -> bool {
        let result = self.session.init_surface();
        self.record(result).is_some()
    }

    fn init_texture(&mut self, size: u32) -> bool {
        let result = self.session.init_texture(size);
        self.record(result).is_some()
    }

    fn init_shaders(&mut self) -> bool {
        let result = self.session.init_shaders();
        self.record(result).is_some()
    }

    fn init_engine(&mut self) -> bool {
        let result = self.session.init_engine();
        self.record(result).is_some()
    }

    fn load_preset(&mut self, path: &str) -> bool {
        let result = self.handle.load_preset(&PresetSource::Path(PathBuf::from(path)));
        self.record(result).is_some()
    }

    fn render(&mut self) -> bool {
        let result = self.session.render();
        self.record(result).is_some()
    }

    fn render_texture(&mut self) -> bool {
        let result = self.session.render_texture();
        self.record(result).is_some()
    }

    fn reshape(&mut self, width: u32, height: u32) -> bool {
        let result = self.session.reshape(width, height);
        self.record(result).is_some()
    }

    fn destroy_audio(&mut self) {
        self.session.destroy_audio();
    }

    fn destroy_gl(&mut self) {
        self.session.destroy_gl();
    }

    fn destroy_engine(&mut self) {
        self.session.destroy_engine();
    }

    fn add_audio(&self, samples: &[f32]) -> bool {
        self.handle.push_audio(samples)
    }

    fn last_error(&self) -> Option<ErrorReport> {
        self.last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    fn visualizer() -> Visualizer {
        Visualizer::new(EngineConfig {
            backend: BackendKind::Null,
            analysis_thread: false,
            ..EngineConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_render_before_open_reports_invalid_state() {
        let mut viz = visualizer();
        assert!(!viz.render());
        let error = viz.last_error().unwrap();
        assert_eq!(error.kind, ErrorKind::InvalidState);
        assert!(error.message.contains("uninitialized"), "{}", error.message);
    }

    #[test]
    fn test_rejected_preset_reports_parse_error() {
        let mut viz = visualizer();
        assert!(viz.open());
        assert!(!viz.load_preset_str("bad", "per_frame_1=zoom = (1;"));
        assert_eq!(viz.last_error().unwrap().kind, ErrorKind::Parse);

        assert!(!viz.load_preset_str("shape", "shapecode_0_enabled=1"));
        assert_eq!(viz.last_error().unwrap().kind, ErrorKind::UnsupportedFeature);

        assert!(!viz.load_preset("/definitely/missing.milk"));
        assert_eq!(viz.last_error().unwrap().kind, ErrorKind::Io);
    }

    #[test]
    fn test_stats_track_frames_and_audio() {
        let mut viz = visualizer();
        assert!(viz.open());
        assert!(viz.add_audio(&vec![0.0; 512 * 2]));
        assert!(viz.render());
        assert!(viz.render_texture());

        let stats = viz.stats();
        assert_eq!(stats.frames_rendered, 2);
        assert_eq!(stats.audio_frames, 1);
        assert_eq!(stats.dropped_blocks, 0);
        assert_eq!(viz.read_pixels().unwrap().len(), 320 * 240 * 4);
    }
}
