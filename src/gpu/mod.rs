//! GPU rendering using wgpu.
//!
//! Provides the headless wgpu implementation of the render engine's
//! [`RenderBackend`](crate::render::RenderBackend): device setup, the
//! warp/wave/composite/blend pipelines and the resource handle registry.

pub mod backend;
pub mod context;
pub mod passes;
pub mod resources;
pub mod shaders;
pub mod textures;

pub use backend::WgpuBackend;
pub use context::{AdapterOptions, GpuContext, GpuError};
pub use resources::{GpuResourceHandle, ResourceClass, ResourceRegistry};
