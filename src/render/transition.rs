//! Cross-fade between two presets.

use std::time::Duration;

use super::state::PresetRuntime;

/// Smoothstep easing: zero slope at both ends so the fade never snaps.
pub fn ease(progress: f32) -> f32 {
    let p = progress.clamp(0.0, 1.0);
    p * p * (3.0 - 2.0 * p)
}

/// An outgoing and an incoming preset blended by elapsed time.
pub struct PresetTransition {
    pub(crate) outgoing: PresetRuntime,
    pub(crate) incoming: PresetRuntime,
    duration: Duration,
    elapsed: Duration,
}

impl PresetTransition {
    pub fn new(outgoing: PresetRuntime, incoming: PresetRuntime, duration: Duration) -> Self {
        Self {
            outgoing,
            incoming,
            duration,
            elapsed: Duration::ZERO,
        }
    }

    pub fn outgoing(&self) -> &PresetRuntime {
        &self.outgoing
    }

    pub fn incoming(&self) -> &PresetRuntime {
        &self.incoming
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Linear progress in `[0, 1]`. Exactly 1.0 once `elapsed >= duration`.
    pub fn progress(&self) -> f32 {
        if self.elapsed >= self.duration {
            return 1.0;
        }
        (self.elapsed.as_secs_f64() / self.duration.as_secs_f64()) as f32
    }

    /// Eased blend weight of the incoming preset.
    pub fn weight(&self) -> f32 {
        ease(self.progress())
    }

    pub fn advance(&mut self, dt: Duration) {
        self.elapsed = self.elapsed.saturating_add(dt).min(self.duration);
    }

    pub fn is_complete(&self) -> bool {
        self.elapsed >= self.duration
    }

    /// Split into (outgoing, incoming).
    pub fn into_parts(self) -> (PresetRuntime, PresetRuntime) {
        (self.outgoing, self.incoming)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::Preset;
    use std::sync::Arc;

    fn runtime() -> PresetRuntime {
        PresetRuntime::new(Arc::new(Preset::builtin_default()), 2, 2)
    }

    #[test]
    fn test_ease_endpoints_and_midpoint() {
        assert_eq!(ease(0.0), 0.0);
        assert_eq!(ease(1.0), 1.0);
        assert_eq!(ease(0.5), 0.5);
        assert_eq!(ease(2.0), 1.0);
        assert!(ease(0.1) < 0.1);
    }

    #[test]
    fn test_weight_is_monotonic_and_reaches_one() {
        let mut t = PresetTransition::new(runtime(), runtime(), Duration::from_millis(1000));
        let mut last = t.weight();
        let mut frames = 0;
        while !t.is_complete() {
            t.advance(Duration::from_millis(16));
            assert!(t.weight() >= last);
            last = t.weight();
            frames += 1;
        }
        assert_eq!(t.weight(), 1.0);
        assert_eq!(t.progress(), 1.0);
        // 1000 ms at 16 ms per frame: done within one extra frame
        assert!(frames <= 1000 / 16 + 1, "took {} frames", frames);
    }

    #[test]
    fn test_zero_duration_is_complete() {
        let t = PresetTransition::new(runtime(), runtime(), Duration::ZERO);
        assert!(t.is_complete());
        assert_eq!(t.weight(), 1.0);
    }
}
