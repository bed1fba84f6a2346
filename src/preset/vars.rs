//! Variable catalogue shared by preset equations and the render engine.
//!
//! Slots `0..INPUT_COUNT` are read-only inputs written by the engine each
//! frame. Slots `INPUT_COUNT..BUILTIN_COUNT` are writable outputs with
//! defaults. Anything a preset introduces itself is interned after those.

use std::collections::HashMap;

pub const TIME: usize = 0;
pub const FRAME: usize = 1;
pub const FPS: usize = 2;
pub const BASS: usize = 3;
pub const MID: usize = 4;
pub const TREB: usize = 5;
pub const BASS_ATT: usize = 6;
pub const MID_ATT: usize = 7;
pub const TREB_ATT: usize = 8;
pub const RMS: usize = 9;
pub const BEAT: usize = 10;
pub const X: usize = 11;
pub const Y: usize = 12;
pub const RAD: usize = 13;
pub const ANG: usize = 14;

pub const INPUT_COUNT: usize = 15;

pub const ZOOM: usize = 15;
pub const ROT: usize = 16;
pub const CX: usize = 17;
pub const CY: usize = 18;
pub const DX: usize = 19;
pub const DY: usize = 20;
pub const SX: usize = 21;
pub const SY: usize = 22;
pub const WARP: usize = 23;
pub const DECAY: usize = 24;
pub const WAVE_R: usize = 25;
pub const WAVE_G: usize = 26;
pub const WAVE_B: usize = 27;
pub const WAVE_A: usize = 28;
pub const WAVE_X: usize = 29;
pub const WAVE_Y: usize = 30;
pub const WAVE_SCALE: usize = 31;
pub const WAVE_MODE: usize = 32;
pub const GAMMA: usize = 33;
pub const Q1: usize = 34;

pub const BUILTIN_COUNT: usize = 42;

const INPUT_NAMES: [&str; INPUT_COUNT] = [
    "time", "frame", "fps", "bass", "mid", "treb", "bass_att", "mid_att", "treb_att", "rms",
    "beat", "x", "y", "rad", "ang",
];

const OUTPUT_DEFAULTS: [(&str, f64); BUILTIN_COUNT - INPUT_COUNT] = [
    ("zoom", 1.0),
    ("rot", 0.0),
    ("cx", 0.5),
    ("cy", 0.5),
    ("dx", 0.0),
    ("dy", 0.0),
    ("sx", 1.0),
    ("sy", 1.0),
    ("warp", 0.0),
    ("decay", 0.98),
    ("wave_r", 1.0),
    ("wave_g", 1.0),
    ("wave_b", 1.0),
    ("wave_a", 0.8),
    ("wave_x", 0.5),
    ("wave_y", 0.5),
    ("wave_scale", 1.0),
    ("wave_mode", 0.0),
    ("gamma", 1.0),
    ("q1", 0.0),
    ("q2", 0.0),
    ("q3", 0.0),
    ("q4", 0.0),
    ("q5", 0.0),
    ("q6", 0.0),
    ("q7", 0.0),
    ("q8", 0.0),
];

/// Legacy `.milk` key spellings mapped to their variable names.
pub fn canonical_name(key: &str) -> &str {
    match key {
        "fDecay" => "decay",
        "fWaveScale" => "wave_scale",
        "fWaveAlpha" => "wave_a",
        "nWaveMode" => "wave_mode",
        "fGammaAdj" => "gamma",
        "fWaveR" => "wave_r",
        "fWaveG" => "wave_g",
        "fWaveB" => "wave_b",
        other => other,
    }
}

/// Name to slot mapping for one preset.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl SymbolTable {
    /// Table holding only the engine inputs and writable built-ins.
    pub fn with_builtins() -> Self {
        let mut table = Self {
            names: Vec::with_capacity(BUILTIN_COUNT + 8),
            index: HashMap::with_capacity(BUILTIN_COUNT + 8),
        };
        for name in INPUT_NAMES {
            table.intern(name);
        }
        for (name, _) in OUTPUT_DEFAULTS {
            table.intern(name);
        }
        table
    }

    pub fn slot(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Slot for `name`, allocating a new user variable if needed.
    pub fn intern(&mut self, name: &str) -> usize {
        if let Some(&slot) = self.index.get(name) {
            return slot;
        }
        let slot = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), slot);
        slot
    }

    pub fn name(&self, slot: usize) -> Option<&str> {
        self.names.get(slot).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn is_read_only(slot: usize) -> bool {
        slot < INPUT_COUNT
    }

    /// A value vector sized to this table, holding built-in defaults.
    pub fn default_values(&self) -> Vec<f64> {
        let mut values = vec![0.0; self.names.len()];
        for (i, (_, default)) in OUTPUT_DEFAULTS.iter().enumerate() {
            values[INPUT_COUNT + i] = *default;
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_constants_match_names() {
        let table = SymbolTable::with_builtins();
        assert_eq!(table.slot("time"), Some(TIME));
        assert_eq!(table.slot("ang"), Some(ANG));
        assert_eq!(table.slot("zoom"), Some(ZOOM));
        assert_eq!(table.slot("decay"), Some(DECAY));
        assert_eq!(table.slot("wave_mode"), Some(WAVE_MODE));
        assert_eq!(table.slot("gamma"), Some(GAMMA));
        assert_eq!(table.slot("q1"), Some(Q1));
        assert_eq!(table.slot("q8"), Some(Q1 + 7));
        assert_eq!(table.len(), BUILTIN_COUNT);
    }

    #[test]
    fn test_user_variables_follow_builtins() {
        let mut table = SymbolTable::with_builtins();
        let slot = table.intern("my_phase");
        assert_eq!(slot, BUILTIN_COUNT);
        assert_eq!(table.intern("my_phase"), slot);
        assert!(!SymbolTable::is_read_only(slot));
        assert!(SymbolTable::is_read_only(BASS));
    }

    #[test]
    fn test_defaults() {
        let values = SymbolTable::with_builtins().default_values();
        assert_eq!(values[ZOOM], 1.0);
        assert_eq!(values[DECAY], 0.98);
        assert_eq!(values[WAVE_A], 0.8);
        assert_eq!(values[TIME], 0.0);
    }

    #[test]
    fn test_legacy_aliases() {
        assert_eq!(canonical_name("fDecay"), "decay");
        assert_eq!(canonical_name("nWaveMode"), "wave_mode");
        assert_eq!(canonical_name("zoom"), "zoom");
    }
}
