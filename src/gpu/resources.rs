//! Opaque handles to GPU resources owned by the render engine.
//!
//! Backends allocate real objects (or nothing, for the null backend) and
//! hand out [`GpuResourceHandle`]s. The registry is the single record of
//! what is still alive, so teardown and resize can release everything and
//! tests can assert that nothing leaked.

use std::collections::HashMap;
use std::fmt;

/// What a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    Texture,
    Framebuffer,
    ShaderProgram,
    Buffer,
}

/// Handle to a backend-owned GPU object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpuResourceHandle {
    id: u64,
    class: ResourceClass,
}

impl GpuResourceHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }
}

impl fmt::Display for GpuResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.class, self.id)
    }
}

/// Live handle bookkeeping. Ids are never reused.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    next_id: u64,
    live: HashMap<GpuResourceHandle, String>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, class: ResourceClass, label: impl Into<String>) -> GpuResourceHandle {
        self.next_id += 1;
        let handle = GpuResourceHandle {
            id: self.next_id,
            class,
        };
        self.live.insert(handle, label.into());
        handle
    }

    /// Returns `false` if the handle was already released.
    pub fn release(&mut self, handle: GpuResourceHandle) -> bool {
        self.live.remove(&handle).is_some()
    }

    pub fn contains(&self, handle: GpuResourceHandle) -> bool {
        self.live.contains_key(&handle)
    }

    pub fn label(&self, handle: GpuResourceHandle) -> Option<&str> {
        self.live.get(&handle).map(String::as_str)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn live_count_of(&self, class: ResourceClass) -> usize {
        self.live.keys().filter(|h| h.class == class).count()
    }

    /// Forget every handle and return how many were live.
    pub fn release_all(&mut self) -> usize {
        let count = self.live.len();
        self.live.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_release() {
        let mut registry = ResourceRegistry::new();
        let tex = registry.allocate(ResourceClass::Texture, "feedback_a");
        let fb = registry.allocate(ResourceClass::Framebuffer, "offscreen");
        assert_ne!(tex, fb);
        assert_eq!(registry.live_count(), 2);
        assert_eq!(registry.label(tex), Some("feedback_a"));

        assert!(registry.release(tex));
        assert!(!registry.release(tex));
        assert!(!registry.contains(tex));
        assert_eq!(registry.live_count_of(ResourceClass::Framebuffer), 1);
    }

    #[test]
    fn test_ids_not_reused_after_release_all() {
        let mut registry = ResourceRegistry::new();
        let first = registry.allocate(ResourceClass::Buffer, "a");
        assert_eq!(registry.release_all(), 1);
        let second = registry.allocate(ResourceClass::Buffer, "b");
        assert!(second.id() > first.id());
        assert_eq!(registry.release_all(), 1);
        assert_eq!(registry.release_all(), 0);
    }
}
