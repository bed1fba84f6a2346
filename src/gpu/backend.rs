//! wgpu implementation of [`RenderBackend`].
//!
//! Each preset owns a ping-pong pair of feedback textures and an offscreen
//! target. Per frame the warp pass resamples the previous feedback through
//! the warp mesh, the wave pass draws over it, and the composite pass writes
//! the result into the offscreen target. `present` blits or blends those
//! targets onto the surface stand-in or the output texture.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use wgpu::{BindGroupLayout, Buffer, RenderPipeline, Sampler, TextureView};

use super::context::{GpuContext, GpuError};
use super::passes::{self, Geometry};
use super::resources::{GpuResourceHandle, ResourceClass, ResourceRegistry};
use super::shaders;
use super::textures::{self, ReadbackBuffer, RenderTarget};
use crate::preset::Preset;
use crate::render::{
    Composite, OutputTarget, PresetFrame, PresetTarget, RenderBackend, WarpVertex, WaveVertex,
};

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct WarpUniforms {
    decay: f32,
    time: f32,
    _padding: [f32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct CompositeUniforms {
    time: f32,
    gamma: f32,
    _padding: [f32; 2],
    q: [f32; 8],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct BlendUniforms {
    weight: f32,
    _padding: [f32; 3],
}

/// Vertices the wave buffer starts with; grown on demand.
const INITIAL_WAVE_CAPACITY: usize = 4096;

struct Pipelines {
    warp_layout: BindGroupLayout,
    warp: RenderPipeline,
    wave: RenderPipeline,
    composite_layout: BindGroupLayout,
    composite: RenderPipeline,
    blend_layout: BindGroupLayout,
    blend: RenderPipeline,
    blit_layout: BindGroupLayout,
    blit: RenderPipeline,
}

impl Pipelines {
    fn new(device: &wgpu::Device) -> Result<Self, GpuError> {
        let module = |label: &'static str, source: &str| -> Result<wgpu::ShaderModule, GpuError> {
            shaders::validate_wgsl(label, source)?;
            Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.to_string().into()),
            }))
        };

        let warp_shader = module("warp_shader", shaders::WARP)?;
        let wave_shader = module("wave_shader", shaders::WAVE)?;
        let composite_shader = module("composite_shader", &shaders::composite_source(None))?;
        let blend_shader = module("blend_shader", shaders::BLEND)?;
        let blit_shader = module("blit_shader", shaders::BLIT)?;

        let warp_layout = passes::bind_group_layout(device, "warp_bind_group_layout", passes::WARP_SLOTS);
        let composite_layout =
            passes::bind_group_layout(device, "composite_bind_group_layout", passes::COMPOSITE_SLOTS);
        let blend_layout = passes::bind_group_layout(device, "blend_bind_group_layout", passes::BLEND_SLOTS);
        let blit_layout = passes::bind_group_layout(device, "blit_bind_group_layout", passes::BLIT_SLOTS);

        let warp = passes::pass_pipeline(device, "warp_pipeline", &warp_shader, Some(&warp_layout), Geometry::WarpMesh);
        let wave = passes::pass_pipeline(device, "wave_pipeline", &wave_shader, None, Geometry::WaveQuads);
        let composite = passes::pass_pipeline(
            device,
            "composite_pipeline",
            &composite_shader,
            Some(&composite_layout),
            Geometry::Fullscreen,
        );
        let blend = passes::pass_pipeline(device, "blend_pipeline", &blend_shader, Some(&blend_layout), Geometry::Fullscreen);
        let blit = passes::pass_pipeline(device, "blit_pipeline", &blit_shader, Some(&blit_layout), Geometry::Fullscreen);

        Ok(Self {
            warp_layout,
            warp,
            wave,
            composite_layout,
            composite,
            blend_layout,
            blend,
            blit_layout,
            blit,
        })
    }
}

/// Surface stand-in and offscreen output, both readable.
struct Outputs {
    surface: RenderTarget,
    output: RenderTarget,
    surface_readback: ReadbackBuffer,
    output_readback: ReadbackBuffer,
    handles: [GpuResourceHandle; 2],
}

impl Outputs {
    fn target(&self, which: OutputTarget) -> (&RenderTarget, &ReadbackBuffer) {
        match which {
            OutputTarget::Surface => (&self.surface, &self.surface_readback),
            OutputTarget::Texture => (&self.output, &self.output_readback),
        }
    }
}

struct PresetResources {
    feedback: [RenderTarget; 2],
    current: usize,
    offscreen: RenderTarget,
    composite: Option<RenderPipeline>,
    texture: Option<RenderTarget>,
    warp_uniforms: Buffer,
    composite_uniforms: Buffer,
    mesh_vertices: Buffer,
    mesh_vertex_count: usize,
    mesh_indices: Buffer,
    index_count: u32,
    waves: Buffer,
    wave_capacity: usize,
}

/// Render backend on a headless wgpu device.
pub struct WgpuBackend {
    ctx: GpuContext,
    registry: ResourceRegistry,
    outputs: Option<Outputs>,
    seed: Option<(RenderTarget, GpuResourceHandle)>,
    pipelines: Option<Pipelines>,
    pipeline_handles: Vec<GpuResourceHandle>,
    repeat_sampler: Sampler,
    clamp_sampler: Sampler,
    blend_uniforms: Buffer,
    presets: HashMap<u64, PresetResources>,
    next_target: u64,
    calls: u64,
}

impl WgpuBackend {
    /// Acquire a device. Fails with [`GpuError::NoAdapter`] when no GPU is usable.
    pub fn new() -> Result<Self, GpuError> {
        Ok(Self::with_context(GpuContext::new_blocking()?))
    }

    pub fn with_context(ctx: GpuContext) -> Self {
        let sampler = |label: &'static str, mode: wgpu::AddressMode| {
            ctx.device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: mode,
                address_mode_v: mode,
                address_mode_w: mode,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::MipmapFilterMode::Linear,
                ..Default::default()
            })
        };
        let repeat_sampler = sampler("feedback_sampler", wgpu::AddressMode::Repeat);
        let clamp_sampler = sampler("clamp_sampler", wgpu::AddressMode::ClampToEdge);
        let blend_uniforms = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blend_uniforms"),
            size: std::mem::size_of::<BlendUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            ctx,
            registry: ResourceRegistry::new(),
            outputs: None,
            seed: None,
            pipelines: None,
            pipeline_handles: Vec::new(),
            repeat_sampler,
            clamp_sampler,
            blend_uniforms,
            presets: HashMap::new(),
            next_target: 0,
            calls: 0,
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    fn allocate_outputs(&mut self, width: u32, height: u32) {
        let device = &self.ctx.device;
        self.outputs = Some(Outputs {
            surface: RenderTarget::for_output(device, "surface", width, height),
            output: RenderTarget::for_output(device, "output_texture", width, height),
            surface_readback: ReadbackBuffer::new(device, width, height),
            output_readback: ReadbackBuffer::new(device, width, height),
            handles: [
                self.registry.allocate(ResourceClass::Framebuffer, "surface"),
                self.registry.allocate(ResourceClass::Texture, "output_texture"),
            ],
        });
        self.calls += 1;
    }

    fn release_outputs(&mut self) {
        if let Some(outputs) = self.outputs.take() {
            for handle in outputs.handles {
                self.registry.release(handle);
            }
        }
    }

    fn encoder(&self, label: &'static str) -> wgpu::CommandEncoder {
        self.ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn blit_bind_group(&self, pipelines: &Pipelines, source: &TextureView) -> wgpu::BindGroup {
        self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit_bind_group"),
            layout: &pipelines.blit_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(source),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.clamp_sampler),
                },
            ],
        })
    }

    fn preset_texture(&self, preset: &Preset) -> Option<RenderTarget> {
        let path = preset.textures().next()?;
        match textures::load_image_texture(&self.ctx.device, &self.ctx.queue, path) {
            Ok(texture) => Some(texture),
            Err(e) => {
                log::warn!("Preset '{}' texture unavailable, using seed: {}", preset.name(), e);
                None
            }
        }
    }

    fn compile_preset_shader(&self, pipelines: &Pipelines, preset: &Preset) -> Result<Option<RenderPipeline>, GpuError> {
        let Some(body) = preset.shader() else {
            return Ok(None);
        };
        let source = shaders::preset_composite_source(preset.name(), body)?;
        let module = self.ctx.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("preset_composite_shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        Ok(Some(passes::pass_pipeline(
            &self.ctx.device,
            "preset_composite_pipeline",
            &module,
            Some(&pipelines.composite_layout),
            Geometry::Fullscreen,
        )))
    }

    /// Copy the seed gradient (scaled) into a fresh feedback texture.
    fn seed_feedback(&self, pipelines: &Pipelines, target: &RenderTarget) {
        let mut encoder = self.encoder("seed_encoder");
        {
            let mut pass = begin_pass(&mut encoder, "seed_pass", target.view(), true);
            if let Some((seed, _)) = &self.seed {
                let bind_group = self.blit_bind_group(pipelines, seed.view());
                pass.set_pipeline(&pipelines.blit);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
    }
}

fn begin_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &'static str,
    view: &TextureView,
    clear: bool,
) -> wgpu::RenderPass<'e> {
    let load = if clear {
        wgpu::LoadOp::Clear(wgpu::Color::BLACK)
    } else {
        wgpu::LoadOp::Load
    };
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            depth_slice: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
        multiview_mask: None,
    })
}

fn buffer(device: &wgpu::Device, label: &'static str, size: usize, usage: wgpu::BufferUsages) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size: size.max(4) as u64,
        usage: usage | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

impl RenderBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn initialize(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        if self.outputs.is_none() {
            textures::check_target_size(&self.ctx.device.limits(), width, height)?;
            self.allocate_outputs(width, height);
            log::info!("Surface initialized at {}x{}", width, height);
        }
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.outputs.is_some()
    }

    fn seed_texture(&mut self, size: u32) -> Result<(), GpuError> {
        if self.outputs.is_none() {
            return Err(GpuError::SurfaceMissing);
        }
        if self.seed.is_none() {
            textures::check_texture_size(&self.ctx.device.limits(), size, size)?;
            let pixels = textures::seed_gradient(size);
            let seed = RenderTarget::from_rgba(&self.ctx.device, &self.ctx.queue, "seed_texture", size, size, &pixels);
            let handle = self.registry.allocate(ResourceClass::Texture, "seed_texture");
            self.seed = Some((seed, handle));
            self.calls += 1;
        }
        Ok(())
    }

    fn prepare_shaders(&mut self) -> Result<(), GpuError> {
        if self.outputs.is_none() {
            return Err(GpuError::SurfaceMissing);
        }
        if self.pipelines.is_none() {
            self.pipelines = Some(Pipelines::new(&self.ctx.device)?);
            self.pipeline_handles = ["warp", "wave", "composite", "blend", "blit"]
                .into_iter()
                .map(|label| self.registry.allocate(ResourceClass::ShaderProgram, label))
                .collect();
            self.calls += 5;
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        if self.outputs.is_none() {
            return Err(GpuError::SurfaceMissing);
        }
        textures::check_target_size(&self.ctx.device.limits(), width, height)?;
        self.release_outputs();
        self.allocate_outputs(width, height);
        log::debug!("Surface resized to {}x{}", width, height);
        Ok(())
    }

    fn create_preset_target(&mut self, preset: &Preset) -> Result<PresetTarget, GpuError> {
        let (width, height) = self
            .outputs
            .as_ref()
            .map(|o| o.surface.size())
            .ok_or(GpuError::SurfaceMissing)?;
        let pipelines = self.pipelines.as_ref().ok_or(GpuError::ShadersMissing)?;
        let device = &self.ctx.device;

        let (composite, shader_fallback) = match self.compile_preset_shader(pipelines, preset) {
            Ok(pipeline) => (pipeline, None),
            Err(e) => (None, Some(e.to_string())),
        };

        let feedback = [
            RenderTarget::for_feedback(device, "feedback_a", width, height),
            RenderTarget::for_feedback(device, "feedback_b", width, height),
        ];
        self.seed_feedback(pipelines, &feedback[0]);

        let resources = PresetResources {
            offscreen: RenderTarget::for_output(device, "preset_offscreen", width, height),
            current: 0,
            texture: self.preset_texture(preset),
            warp_uniforms: buffer(device, "warp_uniforms", std::mem::size_of::<WarpUniforms>(), wgpu::BufferUsages::UNIFORM),
            composite_uniforms: buffer(
                device,
                "composite_uniforms",
                std::mem::size_of::<CompositeUniforms>(),
                wgpu::BufferUsages::UNIFORM,
            ),
            mesh_vertices: buffer(device, "mesh_vertices", 0, wgpu::BufferUsages::VERTEX),
            mesh_vertex_count: 0,
            mesh_indices: buffer(device, "mesh_indices", 0, wgpu::BufferUsages::INDEX),
            index_count: 0,
            waves: buffer(
                device,
                "wave_vertices",
                INITIAL_WAVE_CAPACITY * std::mem::size_of::<WaveVertex>(),
                wgpu::BufferUsages::VERTEX,
            ),
            wave_capacity: INITIAL_WAVE_CAPACITY,
            feedback,
            composite,
        };

        let name = preset.name();
        let mut handles = vec![
            self.registry.allocate(ResourceClass::Texture, format!("{} feedback a", name)),
            self.registry.allocate(ResourceClass::Texture, format!("{} feedback b", name)),
            self.registry.allocate(ResourceClass::Framebuffer, format!("{} offscreen", name)),
            self.registry.allocate(ResourceClass::Buffer, format!("{} buffers", name)),
        ];
        if resources.composite.is_some() {
            handles.push(
                self.registry
                    .allocate(ResourceClass::ShaderProgram, format!("{} composite", name)),
            );
        }
        if resources.texture.is_some() {
            handles.push(self.registry.allocate(ResourceClass::Texture, format!("{} texture", name)));
        }

        self.next_target += 1;
        self.calls += 1;
        self.presets.insert(self.next_target, resources);
        Ok(PresetTarget {
            id: self.next_target,
            handles,
            shader_fallback,
        })
    }

    fn release_preset_target(&mut self, target: PresetTarget) {
        self.presets.remove(&target.id);
        for handle in target.handles {
            self.registry.release(handle);
        }
    }

    fn draw_preset(&mut self, target: &PresetTarget, frame: &PresetFrame<'_>) -> Result<(), GpuError> {
        let pipelines = self.pipelines.as_ref().ok_or(GpuError::ShadersMissing)?;
        let device = &self.ctx.device;
        let queue = &self.ctx.queue;
        let resources = self
            .presets
            .get_mut(&target.id)
            .ok_or_else(|| GpuError::Texture(format!("preset target {} was released", target.id)))?;

        let params = frame.params;
        queue.write_buffer(
            &resources.warp_uniforms,
            0,
            bytemuck::bytes_of(&WarpUniforms {
                decay: params.decay,
                time: params.time,
                _padding: [0.0; 2],
            }),
        );
        queue.write_buffer(
            &resources.composite_uniforms,
            0,
            bytemuck::bytes_of(&CompositeUniforms {
                time: params.time,
                gamma: params.gamma,
                _padding: [0.0; 2],
                q: params.q,
            }),
        );

        let vertices = frame.mesh.vertices();
        if vertices.len() != resources.mesh_vertex_count {
            resources.mesh_vertices = buffer(
                device,
                "mesh_vertices",
                std::mem::size_of_val(vertices),
                wgpu::BufferUsages::VERTEX,
            );
            resources.mesh_vertex_count = vertices.len();
            let indices = frame.mesh.indices();
            resources.mesh_indices = buffer(
                device,
                "mesh_indices",
                std::mem::size_of_val(indices),
                wgpu::BufferUsages::INDEX,
            );
            queue.write_buffer(&resources.mesh_indices, 0, bytemuck::cast_slice(indices));
            resources.index_count = indices.len() as u32;
        }
        queue.write_buffer(&resources.mesh_vertices, 0, bytemuck::cast_slice::<WarpVertex, u8>(vertices));

        if frame.waves.len() > resources.wave_capacity {
            resources.wave_capacity = frame.waves.len().next_power_of_two();
            resources.waves = buffer(
                device,
                "wave_vertices",
                resources.wave_capacity * std::mem::size_of::<WaveVertex>(),
                wgpu::BufferUsages::VERTEX,
            );
        }
        if !frame.waves.is_empty() {
            queue.write_buffer(&resources.waves, 0, bytemuck::cast_slice(frame.waves));
        }

        let previous = &resources.feedback[resources.current];
        let next = &resources.feedback[1 - resources.current];

        let warp_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("warp_bind_group"),
            layout: &pipelines.warp_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: resources.warp_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(previous.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.repeat_sampler),
                },
            ],
        });

        let extra = resources
            .texture
            .as_ref()
            .or(self.seed.as_ref().map(|(seed, _)| seed))
            .unwrap_or(previous);
        let composite_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("composite_bind_group"),
            layout: &pipelines.composite_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: resources.composite_uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(next.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.clamp_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(extra.view()),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("preset_encoder"),
        });
        {
            let mut pass = begin_pass(&mut encoder, "warp_pass", next.view(), true);
            pass.set_pipeline(&pipelines.warp);
            pass.set_bind_group(0, &warp_bind_group, &[]);
            pass.set_vertex_buffer(0, resources.mesh_vertices.slice(..));
            pass.set_index_buffer(resources.mesh_indices.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..resources.index_count, 0, 0..1);

            if !frame.waves.is_empty() {
                pass.set_pipeline(&pipelines.wave);
                pass.set_vertex_buffer(0, resources.waves.slice(..));
                pass.draw(0..frame.waves.len() as u32, 0..1);
            }
        }
        {
            let mut pass = begin_pass(&mut encoder, "composite_pass", resources.offscreen.view(), true);
            pass.set_pipeline(resources.composite.as_ref().unwrap_or(&pipelines.composite));
            pass.set_bind_group(0, &composite_bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        queue.submit(std::iter::once(encoder.finish()));

        resources.current = 1 - resources.current;
        self.calls += 3;
        Ok(())
    }

    fn present(&mut self, composite: Composite<'_>, output: OutputTarget) -> Result<(), GpuError> {
        let outputs = self.outputs.as_ref().ok_or(GpuError::SurfaceMissing)?;
        let pipelines = self.pipelines.as_ref().ok_or(GpuError::ShadersMissing)?;
        let (destination, _) = outputs.target(output);
        let offscreen = |target: &PresetTarget| {
            self.presets
                .get(&target.id)
                .map(|r| &r.offscreen)
                .ok_or_else(|| GpuError::Texture(format!("preset target {} was released", target.id)))
        };

        let mut encoder = self.encoder("present_encoder");
        match composite {
            Composite::Single(target) => {
                let bind_group = self.blit_bind_group(pipelines, offscreen(target)?.view());
                let mut pass = begin_pass(&mut encoder, "blit_pass", destination.view(), true);
                pass.set_pipeline(&pipelines.blit);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            Composite::Blend { from, to, weight } => {
                self.ctx.queue.write_buffer(
                    &self.blend_uniforms,
                    0,
                    bytemuck::bytes_of(&BlendUniforms {
                        weight: weight.clamp(0.0, 1.0),
                        _padding: [0.0; 3],
                    }),
                );
                let bind_group = self.ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("blend_bind_group"),
                    layout: &pipelines.blend_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: self.blend_uniforms.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(offscreen(from)?.view()),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::TextureView(offscreen(to)?.view()),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: wgpu::BindingResource::Sampler(&self.clamp_sampler),
                        },
                    ],
                });
                let mut pass = begin_pass(&mut encoder, "blend_pass", destination.view(), true);
                pass.set_pipeline(&pipelines.blend);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        self.calls += 1;
        Ok(())
    }

    fn read_output(&mut self, output: OutputTarget) -> Result<Vec<u8>, GpuError> {
        let outputs = self.outputs.as_ref().ok_or(GpuError::SurfaceMissing)?;
        let (target, readback) = outputs.target(output);
        let mut encoder = self.encoder("readback_encoder");
        readback.copy_from(&mut encoder, target);
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        let pixels = readback.read_pixels(&self.ctx.device)?;
        self.calls += 1;
        Ok(pixels)
    }

    fn release_all(&mut self) {
        let targets = self.presets.len();
        self.presets.clear();
        self.outputs = None;
        self.seed = None;
        self.pipelines = None;
        self.pipeline_handles.clear();
        let released = self.registry.release_all();
        if released > 0 {
            log::info!(
                "Released {} GPU resource handle(s) across {} preset target(s)",
                released,
                targets
            );
        }
    }

    fn gpu_calls(&self) -> u64 {
        self.calls
    }

    fn live_resources(&self) -> usize {
        self.registry.live_count()
    }
}
