//! Bind group layouts and pipelines of the feedback render passes.
//!
//! Every pass binds a single group whose slots are numbered in declaration
//! order, so the tables below mirror the `@binding` indices in the WGSL.

use wgpu::{BindGroupLayout, BindGroupLayoutEntry, Device, RenderPipeline, ShaderModule, ShaderStages, VertexBufferLayout};

use super::textures::COLOR_FORMAT;
use crate::render::{WarpVertex, WaveVertex};

/// Kind of resource bound at one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Uniforms,
    Texture,
    Sampler,
}

/// Uniforms, previous feedback, sampler.
pub const WARP_SLOTS: &[Slot] = &[Slot::Uniforms, Slot::Texture, Slot::Sampler];
/// Uniforms, feedback, sampler, preset texture.
pub const COMPOSITE_SLOTS: &[Slot] = &[Slot::Uniforms, Slot::Texture, Slot::Sampler, Slot::Texture];
/// Uniforms, outgoing, incoming, sampler.
pub const BLEND_SLOTS: &[Slot] = &[Slot::Uniforms, Slot::Texture, Slot::Texture, Slot::Sampler];
/// Source, sampler.
pub const BLIT_SLOTS: &[Slot] = &[Slot::Texture, Slot::Sampler];

impl Slot {
    fn entry(self, binding: u32) -> BindGroupLayoutEntry {
        let ty = match self {
            Slot::Uniforms => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            Slot::Texture => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            Slot::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        };
        BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::FRAGMENT,
            ty,
            count: None,
        }
    }
}

/// Layout for a pass whose bindings are `slots`, in order.
pub fn bind_group_layout(device: &Device, label: &'static str, slots: &[Slot]) -> BindGroupLayout {
    let entries: Vec<BindGroupLayoutEntry> = slots
        .iter()
        .zip(0u32..)
        .map(|(slot, binding)| slot.entry(binding))
        .collect();
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &entries,
    })
}

/// How a pass feeds its vertices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    /// Three generated vertices covering the target.
    Fullscreen,
    /// Indexed [`WarpVertex`] triangles.
    WarpMesh,
    /// [`WaveVertex`] quads, alpha blended over the target.
    WaveQuads,
}

impl Geometry {
    fn buffers(self) -> Vec<VertexBufferLayout<'static>> {
        match self {
            Geometry::Fullscreen => Vec::new(),
            Geometry::WarpMesh => vec![warp_vertex_layout()],
            Geometry::WaveQuads => vec![wave_vertex_layout()],
        }
    }

    fn blend(self) -> wgpu::BlendState {
        match self {
            Geometry::WaveQuads => wgpu::BlendState::ALPHA_BLENDING,
            _ => wgpu::BlendState::REPLACE,
        }
    }
}

/// Pipeline for one pass, rendering into [`COLOR_FORMAT`]. Entry points are
/// `vs_main` and `fs_main`.
pub fn pass_pipeline(
    device: &Device,
    label: &'static str,
    shader: &ShaderModule,
    group: Option<&BindGroupLayout>,
    geometry: Geometry,
) -> RenderPipeline {
    let groups: Vec<&BindGroupLayout> = group.into_iter().collect();
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &groups,
        immediate_size: 0,
    });
    let buffers = geometry.buffers();

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &buffers,
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: COLOR_FORMAT,
                blend: Some(geometry.blend()),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    })
}

fn warp_vertex_layout() -> VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];
    VertexBufferLayout {
        array_stride: std::mem::size_of::<WarpVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

fn wave_vertex_layout() -> VertexBufferLayout<'static> {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] = wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x4];
    VertexBufferLayout {
        array_stride: std::mem::size_of::<WaveVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &ATTRIBUTES,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuContext;

    #[test]
    fn test_vertex_strides() {
        assert_eq!(warp_vertex_layout().array_stride, 16);
        assert_eq!(wave_vertex_layout().array_stride, 24);
        assert!(Geometry::Fullscreen.buffers().is_empty());
    }

    #[test]
    fn test_slot_tables_match_shader_bindings() {
        assert_eq!(COMPOSITE_SLOTS[3], Slot::Texture);
        assert_eq!(BLEND_SLOTS.iter().filter(|s| **s == Slot::Texture).count(), 2);
        let entries: Vec<_> = BLIT_SLOTS.iter().zip(0u32..).map(|(s, i)| s.entry(i)).collect();
        assert_eq!(entries[1].binding, 1);
        assert!(matches!(entries[1].ty, wgpu::BindingType::Sampler(_)));
    }

    #[tokio::test]
    async fn test_pass_layouts_creation() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return, // Skip if no GPU
        };

        for (label, slots) in [
            ("warp", WARP_SLOTS),
            ("composite", COMPOSITE_SLOTS),
            ("blend", BLEND_SLOTS),
            ("blit", BLIT_SLOTS),
        ] {
            let _layout = bind_group_layout(&ctx.device, label, slots);
        }
    }
}
