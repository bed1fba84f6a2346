//! Waveform geometry.
//!
//! The audio window is drawn as a chain of thick line segments, each a quad
//! of two triangles, in normalized device coordinates.

use bytemuck::{Pod, Zeroable};

use super::state::{FrameParams, WaveMode};
use crate::audio::AudioFrame;
use crate::preset::CustomWave;

/// Most points drawn per waveform; longer windows are decimated.
const MAX_POINTS: usize = 256;

/// Line thickness in pixels.
const LINE_WIDTH_PX: f32 = 2.0;

/// Vertex of the wave pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct WaveVertex {
    pub position: [f32; 2],
    pub color: [f32; 4],
}

/// Output size the geometry is built for.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    fn aspect(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }

    fn half_width(&self) -> f32 {
        LINE_WIDTH_PX / self.height.max(1) as f32
    }
}

/// Push one segment as a quad (thick line).
fn push_segment(out: &mut Vec<WaveVertex>, a: [f32; 2], b: [f32; 2], half_width: f32, aspect: f32, color: [f32; 4]) {
    // Perpendicular in pixel-proportional space, so thickness is uniform.
    let dx = (b[0] - a[0]) * aspect;
    let dy = b[1] - a[1];
    let len = (dx * dx + dy * dy).sqrt().max(1e-6);
    let nx = -dy / len * half_width / aspect;
    let ny = dx / len * half_width;

    let corners = [
        [a[0] + nx, a[1] + ny],
        [a[0] - nx, a[1] - ny],
        [b[0] + nx, b[1] + ny],
        [b[0] - nx, b[1] - ny],
    ];
    for &i in &[0usize, 1, 2, 2, 1, 3] {
        out.push(WaveVertex {
            position: corners[i],
            color,
        });
    }
}

fn decimate(values: &[f32]) -> impl Iterator<Item = f32> + '_ {
    let step = values.len().div_ceil(MAX_POINTS).max(1);
    values.iter().step_by(step).copied()
}

fn polyline(out: &mut Vec<WaveVertex>, points: &[[f32; 2]], closed: bool, viewport: Viewport, color: [f32; 4]) {
    if points.len() < 2 {
        return;
    }
    let half_width = viewport.half_width();
    let aspect = viewport.aspect();
    for pair in points.windows(2) {
        push_segment(out, pair[0], pair[1], half_width, aspect, color);
    }
    if closed {
        push_segment(out, points[points.len() - 1], points[0], half_width, aspect, color);
    }
}

/// Append the main waveform for `params` to `out`.
pub fn build_waveform(out: &mut Vec<WaveVertex>, audio: &AudioFrame, params: &FrameParams, viewport: Viewport) {
    if params.wave_color[3] <= 0.0 {
        return;
    }

    let scale = params.wave_scale;
    let points: Vec<[f32; 2]> = match params.wave_mode {
        WaveMode::Line => {
            let samples: Vec<f32> = decimate(&audio.samples).collect();
            let base_y = params.wave_y * 2.0 - 1.0;
            let n = samples.len().max(2) - 1;
            samples
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    let x = i as f32 / n as f32 * 2.0 - 1.0;
                    [x, base_y + s.clamp(-1.0, 1.0) * 0.5 * scale]
                })
                .collect()
        }
        WaveMode::Circle => {
            let samples: Vec<f32> = decimate(&audio.samples).collect();
            let center = [params.wave_x * 2.0 - 1.0, params.wave_y * 2.0 - 1.0];
            let aspect = viewport.aspect();
            let n = samples.len().max(1);
            samples
                .iter()
                .enumerate()
                .map(|(i, s)| {
                    let angle = i as f32 / n as f32 * std::f32::consts::TAU;
                    let r = 0.5 * (0.6 + 0.4 * s.clamp(-1.0, 1.0) * scale);
                    [center[0] + r * angle.cos() / aspect, center[1] + r * angle.sin()]
                })
                .collect()
        }
    };

    polyline(out, &points, params.wave_mode == WaveMode::Circle, viewport, params.wave_color);
}

/// Append a preset's extra waveform to `out`.
pub fn build_custom_wave(out: &mut Vec<WaveVertex>, audio: &AudioFrame, wave: &CustomWave, viewport: Viewport) {
    let source = if wave.spectrum {
        &audio.spectrum
    } else {
        &audio.samples
    };
    let values: Vec<f32> = decimate(source).collect();
    let n = values.len().max(2) - 1;
    let base_y = wave.y * 2.0 - 1.0;

    let points: Vec<[f32; 2]> = values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let x = i as f32 / n as f32 * 2.0 - 1.0;
            [x, base_y + v.clamp(-1.0, 1.0) * 0.5 * wave.scaling]
        })
        .collect();

    polyline(out, &points, false, viewport, [wave.r, wave.g, wave.b, wave.a]);
}
