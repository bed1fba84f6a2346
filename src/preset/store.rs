//! Active and pending preset slots.
//!
//! `load` parses off the render path and never touches the slots. The only
//! synchronization with the render cadence is the pointer swap done by
//! `activate`, `take_pending` and `promote`, all lock-free via `arc-swap`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;

use super::parser::parse_preset;
use super::{Preset, PresetError, ResourceKind};

/// Where preset text comes from.
#[derive(Debug, Clone)]
pub enum PresetSource {
    Path(PathBuf),
    Inline { name: String, text: String },
}

impl From<&Path> for PresetSource {
    fn from(path: &Path) -> Self {
        PresetSource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for PresetSource {
    fn from(path: PathBuf) -> Self {
        PresetSource::Path(path)
    }
}

/// Resource kinds the rendering backend can provide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    kinds: Vec<ResourceKind>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            kinds: vec![
                ResourceKind::Texture,
                ResourceKind::CustomWaveform,
                ResourceKind::WgslShader,
            ],
        }
    }
}

impl Capabilities {
    pub fn new(kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Only equation-driven presets are accepted.
    pub fn none() -> Self {
        Self { kinds: Vec::new() }
    }

    pub fn supports(&self, kind: ResourceKind) -> bool {
        self.kinds.contains(&kind)
    }
}

/// A preset waiting for the render engine to pick it up.
#[derive(Debug)]
pub struct PendingActivation {
    pub preset: Arc<Preset>,
    /// Zero means the preset is already active and any running transition
    /// should be dropped.
    pub duration: Duration,
}

/// Holds the active preset and at most one pending activation.
pub struct PresetStore {
    active: ArcSwapOption<Preset>,
    pending: ArcSwapOption<PendingActivation>,
    capabilities: Capabilities,
}

impl Default for PresetStore {
    fn default() -> Self {
        Self::new(Capabilities::default())
    }
}

impl PresetStore {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            active: ArcSwapOption::empty(),
            pending: ArcSwapOption::empty(),
            capabilities,
        }
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Parse and validate a preset. Pure: nothing visible to the render
    /// engine changes, whatever the outcome. May block on disk, so never
    /// call it from the render cadence.
    pub fn load(&self, source: &PresetSource) -> Result<Arc<Preset>, PresetError> {
        let preset = match source {
            PresetSource::Path(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| PresetError::Io {
                    path: path.clone(),
                    source,
                })?;
                let id = path.to_string_lossy();
                parse_preset(&text, &id, path.parent())?
            }
            PresetSource::Inline { name, text } => {
                parse_preset(text, &format!("inline:{}", name), None)?
            }
        };

        preset.check_capabilities(&self.capabilities)?;
        log::debug!(
            "Loaded preset '{}' from {} ({} requirement(s))",
            preset.name(),
            preset.id(),
            preset.requirements().len()
        );
        Ok(Arc::new(preset))
    }

    pub fn load_path<P: AsRef<Path>>(&self, path: P) -> Result<Arc<Preset>, PresetError> {
        self.load(&PresetSource::Path(path.as_ref().to_path_buf()))
    }

    pub fn load_str(&self, name: &str, text: &str) -> Result<Arc<Preset>, PresetError> {
        self.load(&PresetSource::Inline {
            name: name.to_string(),
            text: text.to_string(),
        })
    }

    /// Make `preset` current.
    ///
    /// With a zero duration it replaces the active preset immediately.
    /// Otherwise the active preset stays in place until the render engine
    /// finishes the cross-fade and calls [`promote`](Self::promote). A newer
    /// activation replaces an older one that has not been picked up yet.
    pub fn activate(&self, preset: Arc<Preset>, duration: Duration) {
        if duration.is_zero() {
            self.active.store(Some(Arc::clone(&preset)));
        }
        log::debug!(
            "Activating preset '{}' over {} ms",
            preset.name(),
            duration.as_millis()
        );
        self.pending
            .store(Some(Arc::new(PendingActivation { preset, duration })));
    }

    /// The preset currently shown (the outgoing one during a transition).
    pub fn active(&self) -> Option<Arc<Preset>> {
        self.active.load_full()
    }

    pub fn pending(&self) -> Option<Arc<PendingActivation>> {
        self.pending.load_full()
    }

    /// Claim the pending activation, if any. Render cadence only.
    pub fn take_pending(&self) -> Option<Arc<PendingActivation>> {
        self.pending.swap(None)
    }

    /// Record that a transition completed and `preset` is now active.
    pub fn promote(&self, preset: &Arc<Preset>) {
        self.active.store(Some(Arc::clone(preset)));
    }

    /// Drop both slots.
    pub fn clear(&self) {
        self.pending.store(None);
        self.active.store(None);
    }
}
