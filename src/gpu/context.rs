//! GPU context initialization and management.

use std::sync::Arc;
use wgpu::{Adapter, Device, Instance, Queue};

/// Errors that can occur during GPU operations.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("No suitable GPU adapter found")]
    NoAdapter,
    #[error("Failed to request device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
    #[error("Shader rejected: {0}")]
    Shader(String),
    #[error("Texture error: {0}")]
    Texture(String),
    #[error("Readback failed: {0}")]
    Readback(String),
    #[error("Render surface not initialized")]
    SurfaceMissing,
    #[error("Shaders not prepared")]
    ShadersMissing,
}

/// Adapter selection.
#[derive(Debug, Clone, Copy)]
pub struct AdapterOptions {
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    /// Retry with a software adapter (llvmpipe, WARP) when no hardware
    /// adapter is available.
    pub allow_software: bool,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::METAL | wgpu::Backends::VULKAN | wgpu::Backends::GL,
            power_preference: wgpu::PowerPreference::HighPerformance,
            allow_software: true,
        }
    }
}

/// Device and queue shared by every pass of one backend.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Arc<Adapter>,
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
}

impl GpuContext {
    /// Headless context with the default [`AdapterOptions`].
    pub async fn new() -> Result<Self, GpuError> {
        Self::with_options(AdapterOptions::default()).await
    }

    pub async fn with_options(options: AdapterOptions) -> Result<Self, GpuError> {
        let instance = Instance::new(&wgpu::InstanceDescriptor {
            backends: options.backends,
            ..Default::default()
        });

        let request = |force_fallback_adapter| wgpu::RequestAdapterOptions {
            power_preference: options.power_preference,
            force_fallback_adapter,
            compatible_surface: None,
        };
        let adapter = match instance.request_adapter(&request(false)).await {
            Ok(adapter) => adapter,
            Err(e) if options.allow_software => {
                log::debug!("No hardware adapter ({}), trying software", e);
                instance
                    .request_adapter(&request(true))
                    .await
                    .map_err(|_| GpuError::NoAdapter)?
            }
            Err(_) => return Err(GpuError::NoAdapter),
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("auralis"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::default(),
            })
            .await?;

        let info = adapter.get_info();
        log::info!("Using GPU adapter '{}' ({:?})", info.name, info.backend);

        Ok(Self {
            instance,
            adapter: Arc::new(adapter),
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    /// Blocking variant of [`new`](Self::new) for callers outside an async runtime.
    pub fn new_blocking() -> Result<Self, GpuError> {
        pollster::block_on(Self::new())
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_gpu_context_creation() {
        // No adapter on most CI machines; only check it doesn't panic.
        if let Ok(ctx) = GpuContext::new().await {
            assert!(!ctx.adapter_info().name.is_empty());
        }
    }

    #[tokio::test]
    async fn test_empty_backend_set_has_no_adapter() {
        let options = AdapterOptions {
            backends: wgpu::Backends::empty(),
            allow_software: false,
            ..AdapterOptions::default()
        };
        assert!(matches!(GpuContext::with_options(options).await, Err(GpuError::NoAdapter)));
    }
}
