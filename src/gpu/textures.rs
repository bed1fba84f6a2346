//! Color targets, sampled textures and CPU readback.

use std::path::Path;

use wgpu::{Device, Queue, Texture, TextureFormat, TextureUsages, TextureView};

use super::GpuError;

/// Format of every engine-owned color target.
pub const COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

const BYTES_PER_PIXEL: u32 = 4;

/// Role of a texture in the frame graph; decides its usage flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Ping-pong feedback buffer, drawn and sampled, seeded by copy.
    Feedback,
    /// Presentable frame that can be read back.
    Output,
    /// Preset or seed image, never drawn into.
    Sampled,
}

impl TargetKind {
    fn usage(self) -> TextureUsages {
        match self {
            TargetKind::Feedback => {
                TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST
            }
            TargetKind::Output => {
                TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_SRC
            }
            TargetKind::Sampled => TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST | TextureUsages::COPY_SRC,
        }
    }
}

/// Texture plus its default view, sized in pixels.
pub struct RenderTarget {
    texture: Texture,
    view: TextureView,
    kind: TargetKind,
    width: u32,
    height: u32,
}

impl RenderTarget {
    pub fn allocate(device: &Device, label: &str, kind: TargetKind, width: u32, height: u32) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: kind.usage(),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            texture,
            view,
            kind,
            width,
            height,
        }
    }

    pub fn for_feedback(device: &Device, label: &str, width: u32, height: u32) -> Self {
        Self::allocate(device, label, TargetKind::Feedback, width, height)
    }

    pub fn for_output(device: &Device, label: &str, width: u32, height: u32) -> Self {
        Self::allocate(device, label, TargetKind::Output, width, height)
    }

    /// Sampled texture filled from tightly packed RGBA8 pixels.
    pub fn from_rgba(device: &Device, queue: &Queue, label: &str, width: u32, height: u32, rgba: &[u8]) -> Self {
        let target = Self::allocate(device, label, TargetKind::Sampled, width, height);
        target.upload(queue, rgba);
        target
    }

    fn upload(&self, queue: &Queue, rgba: &[u8]) {
        let layout = wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(self.width * BYTES_PER_PIXEL),
            rows_per_image: Some(self.height),
        };
        queue.write_texture(self.texture.as_image_copy(), rgba, layout, self.extent());
    }

    pub fn view(&self) -> &TextureView {
        &self.view
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn extent(&self) -> wgpu::Extent3d {
        extent(self.width, self.height)
    }
}

fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// RGBA8 gradient used to seed feedback buffers: red follows the row, green
/// the column, blue the inverted row, all wrapping at 256.
pub fn seed_gradient(size: u32) -> Vec<u8> {
    (0..size)
        .flat_map(|row| (0..size).map(move |col| (row as u8, col as u8)))
        .flat_map(|(r, g)| [r, g, 255 - r, 255])
        .collect()
}

/// Decode a preset image into a sampled texture.
pub fn load_image_texture(device: &Device, queue: &Queue, path: &Path) -> Result<RenderTarget, GpuError> {
    let image = image::open(path)
        .map_err(|e| GpuError::Texture(format!("{}: {}", path.display(), e)))?
        .to_rgba8();
    check_texture_size(&device.limits(), image.width(), image.height())?;
    let label = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    Ok(RenderTarget::from_rgba(
        device,
        queue,
        &label,
        image.width(),
        image.height(),
        image.as_raw(),
    ))
}

/// Rejects a sampled texture the device cannot allocate.
pub fn check_texture_size(limits: &wgpu::Limits, width: u32, height: u32) -> Result<(), GpuError> {
    if width == 0 || height == 0 {
        return Err(GpuError::Texture(format!("{}x{} has an empty dimension", width, height)));
    }
    let max = limits.max_texture_dimension_2d;
    if width > max || height > max {
        return Err(GpuError::Texture(format!(
            "{}x{} exceeds the device limit of {} pixels per edge",
            width, height, max
        )));
    }
    Ok(())
}

/// Like [`check_texture_size`], and also requires the readback buffer of a
/// target this size to fit in one device buffer.
pub fn check_target_size(limits: &wgpu::Limits, width: u32, height: u32) -> Result<(), GpuError> {
    check_texture_size(limits, width, height)?;
    let bytes = u64::from(aligned_stride(width)) * u64::from(height);
    if bytes > limits.max_buffer_size {
        return Err(GpuError::Texture(format!(
            "{}x{} needs a {} byte readback buffer, the device allows {}",
            width, height, bytes, limits.max_buffer_size
        )));
    }
    Ok(())
}

/// Row stride of a texture-to-buffer copy, rounded up to the copy alignment.
fn aligned_stride(width: u32) -> u32 {
    (width * BYTES_PER_PIXEL).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
}

/// Mappable staging buffer that brings an [`Output`](TargetKind::Output)
/// target back to the CPU.
pub struct ReadbackBuffer {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    stride: u32,
}

impl ReadbackBuffer {
    pub fn new(device: &Device, width: u32, height: u32) -> Self {
        let stride = aligned_stride(width);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: u64::from(stride) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            width,
            height,
            stride,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, target: &RenderTarget) {
        let destination = wgpu::TexelCopyBufferInfo {
            buffer: &self.buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.stride),
                rows_per_image: Some(self.height),
            },
        };
        encoder.copy_texture_to_buffer(target.texture().as_image_copy(), destination, target.extent());
    }

    /// Blocks until the last recorded copy lands, then returns tightly packed
    /// RGBA8 rows.
    pub fn read_pixels(&self, device: &Device) -> Result<Vec<u8>, GpuError> {
        let slice = self.buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |mapped| {
            let _ = tx.send(mapped);
        });
        device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| GpuError::Readback(e.to_string()))?;
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(GpuError::Readback(e.to_string())),
            Err(e) => return Err(GpuError::Readback(e.to_string())),
        }

        let row_bytes = (self.width * BYTES_PER_PIXEL) as usize;
        let pixels = {
            let mapped = slice.get_mapped_range();
            mapped
                .chunks(self.stride as usize)
                .take(self.height as usize)
                .flat_map(|row| &row[..row_bytes])
                .copied()
                .collect()
        };
        self.buffer.unmap();
        Ok(pixels)
    }
}
