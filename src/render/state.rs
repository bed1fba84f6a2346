//! CPU-side preset evaluation.
//!
//! A [`PresetRuntime`] carries one preset's variable state across frames,
//! runs its equations against the latest audio features, and evaluates the
//! per-pixel equations on the warp mesh. Non-finite results never reach the
//! GPU: the runtime falls back to its last good state and marks itself
//! degraded.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use super::backend::PresetTarget;
use crate::audio::AudioFrame;
use crate::preset::vars::{self, BUILTIN_COUNT, INPUT_COUNT};
use crate::preset::{Preset, Program};

/// Engine-provided values for one frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameInputs {
    pub time: f64,
    pub frame: u64,
    pub fps: f64,
    pub bass: f64,
    pub mid: f64,
    pub treb: f64,
    pub bass_att: f64,
    pub mid_att: f64,
    pub treb_att: f64,
    pub rms: f64,
    /// Beat confidence, 0..1.
    pub beat: f64,
}

impl FrameInputs {
    pub fn new(audio: &AudioFrame, time: f64, frame: u64, fps: f64) -> Self {
        let bands = &audio.bands;
        Self {
            time,
            frame,
            fps,
            bass: bands.bass as f64,
            mid: bands.mid as f64,
            treb: bands.treb as f64,
            bass_att: bands.bass_att as f64,
            mid_att: bands.mid_att as f64,
            treb_att: bands.treb_att as f64,
            rms: audio.rms as f64,
            beat: audio.beat.confidence as f64,
        }
    }

    fn write(&self, values: &mut [f64]) {
        values[vars::TIME] = self.time;
        values[vars::FRAME] = self.frame as f64;
        values[vars::FPS] = self.fps;
        values[vars::BASS] = self.bass;
        values[vars::MID] = self.mid;
        values[vars::TREB] = self.treb;
        values[vars::BASS_ATT] = self.bass_att;
        values[vars::MID_ATT] = self.mid_att;
        values[vars::TREB_ATT] = self.treb_att;
        values[vars::RMS] = self.rms;
        values[vars::BEAT] = self.beat;
        values[vars::X] = 0.0;
        values[vars::Y] = 0.0;
        values[vars::RAD] = 0.0;
        values[vars::ANG] = 0.0;
    }
}

/// How the main waveform is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaveMode {
    /// Horizontal oscilloscope line through `wave_y`.
    #[default]
    Line,
    /// Closed loop around (`wave_x`, `wave_y`).
    Circle,
}

/// Per-frame uniform state extracted from a preset's variables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameParams {
    pub time: f32,
    pub decay: f32,
    pub gamma: f32,
    pub wave_color: [f32; 4],
    pub wave_x: f32,
    pub wave_y: f32,
    pub wave_scale: f32,
    pub wave_mode: WaveMode,
    pub q: [f32; 8],
}

impl Default for FrameParams {
    fn default() -> Self {
        Self::from_values(&Preset::builtin_default().base_values)
    }
}

impl FrameParams {
    fn from_values(values: &[f64]) -> Self {
        let unit = |slot: usize| values[slot].clamp(0.0, 1.0) as f32;
        let mut q = [0.0f32; 8];
        for (i, q) in q.iter_mut().enumerate() {
            *q = values[vars::Q1 + i] as f32;
        }
        Self {
            time: values[vars::TIME] as f32,
            decay: unit(vars::DECAY),
            gamma: values[vars::GAMMA].clamp(0.05, 8.0) as f32,
            wave_color: [
                unit(vars::WAVE_R),
                unit(vars::WAVE_G),
                unit(vars::WAVE_B),
                unit(vars::WAVE_A),
            ],
            wave_x: values[vars::WAVE_X] as f32,
            wave_y: values[vars::WAVE_Y] as f32,
            wave_scale: values[vars::WAVE_SCALE] as f32,
            wave_mode: if (values[vars::WAVE_MODE].round() as i64).rem_euclid(2) == 1 {
                WaveMode::Circle
            } else {
                WaveMode::Line
            },
            q,
        }
    }
}

/// One vertex of the warp mesh: where it sits, and where it samples the
/// previous frame from.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct WarpVertex {
    pub position: [f32; 2],
    pub uv: [f32; 2],
}

/// Warp the texture coordinate (`x`, `y`) by the motion variables in `v`.
fn warp_uv(x: f64, y: f64, v: &[f64]) -> [f64; 2] {
    let (cx, cy) = (v[vars::CX], v[vars::CY]);

    // stretch, then zoom, both about the center
    let mut u = (x - cx) / v[vars::SX] + cx;
    let mut w = (y - cy) / v[vars::SY] + cy;
    let zoom = v[vars::ZOOM];
    u = (u - cx) / zoom + cx;
    w = (w - cy) / zoom + cy;

    let warp = v[vars::WARP];
    if warp != 0.0 {
        let t = v[vars::TIME];
        u += warp * 0.01 * (t * 0.53 + y * 7.0).sin();
        w += warp * 0.01 * (t * 0.61 + x * 7.0).cos();
    }

    let (s, c) = v[vars::ROT].sin_cos();
    let (du, dw) = (u - cx, w - cy);
    u = cx + du * c - dw * s;
    w = cy + du * s + dw * c;

    [u - v[vars::DX], w - v[vars::DY]]
}

/// Grid of `cols × rows` cells covering the whole target.
#[derive(Debug, Clone)]
pub struct WarpMesh {
    cols: u32,
    rows: u32,
    vertices: Vec<WarpVertex>,
    indices: Vec<u32>,
}

impl WarpMesh {
    pub fn new(cols: u32, rows: u32) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);

        let mut vertices = Vec::with_capacity(((cols + 1) * (rows + 1)) as usize);
        for row in 0..=rows {
            for col in 0..=cols {
                let x = col as f32 / cols as f32;
                let y = row as f32 / rows as f32;
                vertices.push(WarpVertex {
                    position: [x * 2.0 - 1.0, 1.0 - y * 2.0],
                    uv: [x, y],
                });
            }
        }

        let stride = cols + 1;
        let mut indices = Vec::with_capacity((cols * rows * 6) as usize);
        for row in 0..rows {
            for col in 0..cols {
                let tl = row * stride + col;
                let tr = tl + 1;
                let bl = tl + stride;
                let br = bl + 1;
                indices.extend_from_slice(&[tl, bl, tr, tr, bl, br]);
            }
        }

        Self {
            cols,
            rows,
            vertices,
            indices,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.cols, self.rows)
    }

    pub fn vertices(&self) -> &[WarpVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Recompute every vertex's sample coordinate. Returns `false` if any
    /// vertex produced a non-finite value; such vertices keep the per-frame
    /// warp instead.
    fn evaluate(&mut self, per_pixel: &Program, values: &[f64], scratch: &mut Vec<f64>) -> bool {
        let mut all_finite = true;
        let stride = self.cols + 1;

        for (i, vertex) in self.vertices.iter_mut().enumerate() {
            let col = i as u32 % stride;
            let row = i as u32 / stride;
            let x = col as f64 / self.cols as f64;
            let y = row as f64 / self.rows as f64;

            let finite = |uv: &[f64; 2]| uv[0].is_finite() && uv[1].is_finite();
            let frame_uv = warp_uv(x, y, values);

            let uv = if per_pixel.is_empty() {
                frame_uv
            } else {
                scratch.clear();
                scratch.extend_from_slice(values);
                let (dx, dy) = (x - 0.5, y - 0.5);
                scratch[vars::X] = x;
                scratch[vars::Y] = y;
                scratch[vars::RAD] = (dx * dx + dy * dy).sqrt() / std::f64::consts::FRAC_1_SQRT_2;
                scratch[vars::ANG] = dy.atan2(dx);
                per_pixel.run(scratch);
                warp_uv(x, y, scratch)
            };

            let uv = if finite(&uv) {
                uv
            } else {
                all_finite = false;
                if finite(&frame_uv) {
                    frame_uv
                } else {
                    [x, y]
                }
            };

            vertex.uv = [uv[0] as f32, uv[1] as f32];
        }

        all_finite
    }
}

/// Evaluation state of one preset while it is active or transitioning.
pub struct PresetRuntime {
    preset: Arc<Preset>,
    values: Vec<f64>,
    last_good: Vec<f64>,
    next: Vec<f64>,
    pixel_scratch: Vec<f64>,
    mesh: WarpMesh,
    params: FrameParams,
    initialized: bool,
    degraded: Option<String>,
    pub(crate) target: Option<PresetTarget>,
    /// Allocation was attempted and failed; not retried.
    pub(crate) target_failed: bool,
}

impl PresetRuntime {
    pub fn new(preset: Arc<Preset>, mesh_cols: u32, mesh_rows: u32) -> Self {
        let values = preset.base_values().to_vec();
        Self {
            last_good: values.clone(),
            next: values.clone(),
            params: FrameParams::from_values(&values),
            values,
            pixel_scratch: Vec::new(),
            mesh: WarpMesh::new(mesh_cols, mesh_rows),
            preset,
            initialized: false,
            degraded: None,
            target: None,
            target_failed: false,
        }
    }

    pub fn preset(&self) -> &Arc<Preset> {
        &self.preset
    }

    pub fn params(&self) -> &FrameParams {
        &self.params
    }

    pub fn mesh(&self) -> &WarpMesh {
        &self.mesh
    }

    /// Current value of a named variable.
    pub fn value(&self, name: &str) -> Option<f64> {
        self.preset
            .symbols()
            .slot(name)
            .and_then(|slot| self.values.get(slot).copied())
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        self.degraded.as_deref()
    }

    /// Flag the preset as degraded. Logged the first time only.
    /// Returns `true` if this call changed the state.
    pub fn mark_degraded(&mut self, reason: impl Into<String>) -> bool {
        if self.degraded.is_some() {
            return false;
        }
        let reason = reason.into();
        log::warn!(
            "Preset '{}' degraded, keeping last good state: {}",
            self.preset.name(),
            reason
        );
        self.degraded = Some(reason);
        true
    }

    /// Run the equations for one frame and refresh the warp mesh.
    pub fn evaluate(&mut self, inputs: &FrameInputs) -> &FrameParams {
        let preset = Arc::clone(&self.preset);
        let base = preset.base_values();

        if !self.initialized {
            self.initialized = true;
            inputs.write(&mut self.values);
            preset.per_frame_init().run(&mut self.values);
            if self.values.iter().all(|v| v.is_finite()) {
                self.last_good.copy_from_slice(&self.values);
            } else {
                self.mark_degraded("per_frame_init produced a non-finite value");
                self.values.copy_from_slice(base);
                self.last_good.copy_from_slice(base);
            }
        }

        // Built-ins restart from their base value every frame; user
        // variables carry over.
        self.next.copy_from_slice(&self.values);
        self.next[INPUT_COUNT..BUILTIN_COUNT].copy_from_slice(&base[INPUT_COUNT..BUILTIN_COUNT]);
        inputs.write(&mut self.next);
        preset.per_frame().run(&mut self.next);

        if self.next.iter().all(|v| v.is_finite()) {
            std::mem::swap(&mut self.values, &mut self.next);
            self.last_good.copy_from_slice(&self.values);
        } else {
            self.mark_degraded("per-frame equations produced a non-finite value");
            self.values.copy_from_slice(&self.last_good);
            inputs.write(&mut self.values);
        }

        self.params = FrameParams::from_values(&self.values);

        let finite = self
            .mesh
            .evaluate(preset.per_pixel(), &self.values, &mut self.pixel_scratch);
        if !finite {
            self.mark_degraded("per-pixel equations produced a non-finite value");
        }

        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::PresetStore;

    fn runtime(source: &str) -> PresetRuntime {
        let preset = PresetStore::default().load_str("test", source).unwrap();
        PresetRuntime::new(preset, 4, 3)
    }

    fn inputs(frame: u64) -> FrameInputs {
        FrameInputs {
            time: frame as f64 / 60.0,
            frame,
            fps: 60.0,
            bass: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_mesh_shape() {
        let mesh = WarpMesh::new(4, 3);
        assert_eq!(mesh.vertices().len(), 5 * 4);
        assert_eq!(mesh.indices().len(), 4 * 3 * 6);
        assert_eq!(mesh.vertices()[0].position, [-1.0, 1.0]);
        assert_eq!(mesh.vertices()[19].uv, [1.0, 1.0]);
    }

    #[test]
    fn test_identity_warp() {
        let mut rt = runtime("zoom=1");
        rt.evaluate(&inputs(0));
        for v in rt.mesh().vertices() {
            let expected = [(v.position[0] + 1.0) / 2.0, (1.0 - v.position[1]) / 2.0];
            assert!((v.uv[0] - expected[0]).abs() < 1e-6);
            assert!((v.uv[1] - expected[1]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_zoom_pulls_samples_toward_center() {
        let mut rt = runtime("zoom=2");
        rt.evaluate(&inputs(0));
        let corner = rt.mesh().vertices()[0].uv;
        assert!((corner[0] - 0.25).abs() < 1e-6);
        assert!((corner[1] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_user_variables_persist_and_builtins_reset() {
        let mut rt = runtime("per_frame_1=n = n + 1; zoom = zoom + 0.5;");
        for frame in 0..3 {
            rt.evaluate(&inputs(frame));
        }
        assert_eq!(rt.value("n"), Some(3.0));
        assert_eq!(rt.value("zoom"), Some(1.5));
    }

    #[test]
    fn test_init_runs_once() {
        let mut rt = runtime("per_frame_init_1=seed = 10;\nper_frame_1=seed = seed + 1;");
        rt.evaluate(&inputs(0));
        rt.evaluate(&inputs(1));
        assert_eq!(rt.value("seed"), Some(12.0));
    }

    #[test]
    fn test_non_finite_restores_last_good() {
        let mut rt = runtime("per_frame_1=n = n + 1; rot = if(above(n, 2), 1 / 0, 0.1);");
        rt.evaluate(&inputs(0));
        rt.evaluate(&inputs(1));
        assert!(!rt.is_degraded());
        assert_eq!(rt.value("n"), Some(2.0));

        rt.evaluate(&inputs(2));
        assert!(rt.is_degraded());
        assert_eq!(rt.value("n"), Some(2.0));
        assert_eq!(rt.value("rot"), Some(0.1));
        assert!(rt.params().decay.is_finite());
    }

    #[test]
    fn test_per_pixel_non_finite_degrades() {
        let mut rt = runtime("per_pixel_1=zoom = 0 / (x - x);");
        rt.evaluate(&inputs(0));
        assert!(rt.is_degraded());
        assert!(rt
            .mesh()
            .vertices()
            .iter()
            .all(|v| v.uv[0].is_finite() && v.uv[1].is_finite()));
    }

    #[test]
    fn test_zero_zoom_falls_back_to_identity() {
        let mut rt = runtime("zoom=0");
        rt.evaluate(&inputs(0));
        assert!(rt.is_degraded());
        assert_eq!(rt.mesh().vertices()[0].uv, [0.0, 0.0]);
    }

    #[test]
    fn test_mark_degraded_reports_first_only() {
        let mut rt = runtime("");
        assert!(rt.mark_degraded("first"));
        assert!(!rt.mark_degraded("second"));
        assert_eq!(rt.degraded_reason(), Some("first"));
    }

    #[test]
    fn test_wave_mode_rounding() {
        let mut rt = runtime("wave_mode=1");
        assert_eq!(rt.evaluate(&inputs(0)).wave_mode, WaveMode::Circle);
        let mut rt = runtime("wave_mode=2");
        assert_eq!(rt.evaluate(&inputs(0)).wave_mode, WaveMode::Line);
    }
}
