//! Auralis Core
//!
//! Real-time audio-reactive visualization engine driven by text presets.
//!
//! # Features
//!
//! - Non-blocking PCM ingest with FFT, RMS, band and beat analysis via RustFFT
//! - Preset equation language parsed with nom and evaluated per frame and per vertex
//! - Timed cross-fades between presets with lock-free hand-off via arc-swap
//! - GPU rendering via wgpu (Metal on macOS, Vulkan on Linux), or a null backend
//! - Boolean host facade mirroring the classic init/render/destroy call sequence
//! - Python bindings via PyO3 (when `python` feature is enabled)

pub mod audio;
pub mod config;
pub mod facade;
pub mod gpu;
pub mod preset;
pub mod render;
pub mod session;

// Re-export commonly used types
pub use audio::{load_audio, AudioData, AudioFrame, AudioIngest, IngestStats, SpectrumAnalyzer};
pub use config::{BackendKind, ConfigError, EngineConfig};
pub use facade::{EngineStats, ErrorKind, ErrorReport, Visualizer, VisualizerApi};
pub use gpu::{GpuContext, GpuError, GpuResourceHandle, WgpuBackend};
pub use preset::{parse_preset, Preset, PresetError, PresetSource, PresetStore};
pub use render::{FrameStats, NullBackend, OutputTarget, RenderBackend, RenderEngine, RenderError};
pub use session::{Session, SessionError, SessionHandle, SessionState};

// Python bindings (only when python feature is enabled)
#[cfg(feature = "python")]
#[allow(deprecated)] // PyO3 0.27 deprecations - APIs still functional
mod python_bindings {
    use crate::config::EngineConfig;
    use crate::facade::{Visualizer, VisualizerApi};
    use crate::preset::PresetStore;
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use pyo3::types::PyBytes;

    /// One visualization session driven from Python.
    #[pyclass(name = "Visualizer", unsendable)]
    struct PyVisualizer {
        inner: Visualizer,
    }

    #[pymethods]
    impl PyVisualizer {
        /// Create a session. `config_json` overrides the default configuration.
        #[new]
        #[pyo3(signature = (config_json=None))]
        fn new(config_json: Option<&str>) -> PyResult<Self> {
            let config = match config_json {
                Some(text) => serde_json::from_str::<EngineConfig>(text)
                    .map_err(|e| PyValueError::new_err(e.to_string()))?,
                None => EngineConfig::default(),
            };
            let inner = Visualizer::new(config).map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
            Ok(Self { inner })
        }

        fn open(&mut self) -> bool {
            self.inner.open()
        }

        fn close(&mut self) {
            self.inner.close();
        }

        /// Create the presentation surface. First staged init call.
        fn init_gl_window(&mut self) -> bool {
            self.inner.init_gl_window()
        }

        /// Seed the feedback buffers with a `size` x `size` gradient.
        fn init_texture(&mut self, size: u32) -> bool {
            self.inner.init_texture(size)
        }

        fn init_shaders(&mut self) -> bool {
            self.inner.init_shaders()
        }

        /// Start audio ingest and activate the first preset.
        fn init_engine(&mut self) -> bool {
            self.inner.init_engine()
        }

        fn destroy_audio(&mut self) {
            self.inner.destroy_audio();
        }

        fn destroy_gl(&mut self) {
            self.inner.destroy_gl();
        }

        fn destroy_engine(&mut self) {
            self.inner.destroy_engine();
        }

        fn state(&self) -> String {
            self.inner.state().to_string()
        }

        fn load_preset(&mut self, path: &str) -> bool {
            self.inner.load_preset(path)
        }

        fn load_preset_str(&mut self, name: &str, text: &str) -> bool {
            self.inner.load_preset_str(name, text)
        }

        /// Push interleaved float PCM. Returns `False` when the block was dropped.
        fn add_audio(&self, py: Python<'_>, samples: Vec<f32>) -> bool {
            let handle = self.inner.handle();
            py.allow_threads(move || handle.push_audio(&samples))
        }

        fn render(&mut self) -> bool {
            self.inner.render()
        }

        fn render_texture(&mut self) -> bool {
            self.inner.render_texture()
        }

        fn reshape(&mut self, width: u32, height: u32) -> bool {
            self.inner.reshape(width, height)
        }

        /// RGBA8 bytes of the last surface frame, or `None` on failure.
        fn read_pixels<'py>(&mut self, py: Python<'py>) -> Option<Bound<'py, PyBytes>> {
            self.inner.read_pixels().map(|pixels| PyBytes::new(py, &pixels))
        }

        /// RGBA8 bytes of the last offscreen texture frame, or `None` on failure.
        fn read_texture<'py>(&mut self, py: Python<'py>) -> Option<Bound<'py, PyBytes>> {
            self.inner.read_texture().map(|pixels| PyBytes::new(py, &pixels))
        }

        /// `(kind, message)` of the most recent failure.
        fn last_error(&self) -> Option<(String, String)> {
            self.inner.last_error().map(|report| {
                let kind = serde_json::to_value(report.kind)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                (kind, report.message)
            })
        }

        /// Engine counters as a JSON string.
        fn stats(&self) -> PyResult<String> {
            serde_json::to_string(&self.inner.stats()).map_err(|e| PyRuntimeError::new_err(e.to_string()))
        }
    }

    /// Parse a preset file and return its display name. Raises on rejection.
    #[pyfunction]
    fn validate_preset(path: &str) -> PyResult<String> {
        let store = PresetStore::default();
        let preset = store.load_path(path).map_err(|e| PyValueError::new_err(e.to_string()))?;
        Ok(preset.name().to_string())
    }

    /// Auralis Python module
    #[pymodule]
    pub fn auralis(m: &Bound<'_, PyModule>) -> PyResult<()> {
        let _ = env_logger::try_init();
        m.add("__version__", env!("CARGO_PKG_VERSION"))?;
        m.add_class::<PyVisualizer>()?;
        m.add_function(wrap_pyfunction!(validate_preset, m)?)?;
        Ok(())
    }
}

#[cfg(feature = "python")]
pub use python_bindings::*;
