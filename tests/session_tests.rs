//! End-to-end session tests against the null backend.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use auralis::facade::{ErrorKind, Visualizer, VisualizerApi};
use auralis::preset::PresetSource;
use auralis::render::{NullBackend, NullProbe, OutputTarget};
use auralis::session::{Session, SessionError, SessionState};
use auralis::{BackendKind, EngineConfig};

const FRAME: Duration = Duration::from_millis(16);

const PRESET_A: &str = "\
name=A
zoom=1.02
per_frame_1=rot = 0.01 * bass;
";

const PRESET_B: &str = "\
name=B
fDecay=0.9
per_frame_1=q1 = beat;
";

fn config() -> EngineConfig {
    EngineConfig {
        backend: BackendKind::Null,
        analysis_thread: false,
        channels: 1,
        fft_size: 512,
        ..EngineConfig::default()
    }
}

fn session() -> (Session, Arc<NullProbe>) {
    let backend = NullBackend::new();
    let probe = backend.probe();
    let session = Session::with_backend(config(), Box::new(backend)).unwrap();
    (session, probe)
}

fn inline(name: &str, text: &str) -> PresetSource {
    PresetSource::Inline {
        name: name.to_string(),
        text: text.to_string(),
    }
}

#[test]
fn test_cross_fade_scenario() {
    let (mut session, _probe) = session();
    session.open().unwrap();
    let handle = session.handle();

    assert!(handle.push_audio(&[0.0; 512]));
    let stats = session.render_with_delta(FRAME, OutputTarget::Surface).unwrap();
    assert_eq!(stats.audio_sequence, 1);
    assert_eq!(handle.ingest_stats().unwrap().frames, 1);

    handle.load_preset_with(&inline("A", PRESET_A), Duration::ZERO).unwrap();
    for _ in 0..10 {
        let stats = session.render_with_delta(FRAME, OutputTarget::Surface).unwrap();
        assert!(stats.presented);
        assert!(stats.transition_progress.is_none());
        assert!(stats.audio_stale);
    }
    assert_eq!(session.store().active().unwrap().name(), "A");
    assert_eq!(session.engine().unwrap().current_preset().unwrap().name(), "A");

    handle.load_preset_with(&inline("B", PRESET_B), Duration::from_millis(1000)).unwrap();
    assert_eq!(session.store().active().unwrap().name(), "A");

    let mut last_weight = 0.0;
    for i in 1..=63 {
        let stats = session.render_with_delta(FRAME, OutputTarget::Surface).unwrap();
        let weight = stats.blend_weight.unwrap();
        assert!(weight >= last_weight, "frame {}: {} < {}", i, weight, last_weight);
        last_weight = weight;
        if i < 63 {
            assert!(weight < 1.0, "frame {} finished early", i);
            assert_eq!(session.store().active().unwrap().name(), "A");
        }
    }
    assert_eq!(last_weight, 1.0);
    assert_eq!(session.store().active().unwrap().name(), "B");

    let stats = session.render_with_delta(FRAME, OutputTarget::Surface).unwrap();
    assert!(stats.transition_progress.is_none());
    assert!(session.engine().unwrap().transition().is_none());
    assert_eq!(session.engine().unwrap().current_preset().unwrap().name(), "B");
}

#[test]
fn test_silent_audio_reaches_presets_as_zero() {
    let (mut session, _probe) = session();
    session.open().unwrap();
    let handle = session.handle();
    handle.load_preset_with(&inline("B", PRESET_B), Duration::ZERO).unwrap();

    assert!(handle.push_audio(&[0.0; 512]));
    let stats = session.render_with_delta(FRAME, OutputTarget::Surface).unwrap();
    assert!(!stats.audio_stale);

    let runtime = session.engine().unwrap().active().unwrap();
    assert_eq!(runtime.value("rms"), Some(0.0));
    assert_eq!(runtime.value("beat"), Some(0.0));
    assert_eq!(runtime.value("q1"), Some(0.0));
}

#[test]
fn test_render_before_open_touches_no_gpu() {
    let (mut session, probe) = session();
    let err = session.render().unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            state: SessionState::Uninitialized,
            ..
        }
    ));
    assert_eq!(probe.calls(), 0);
    assert_eq!(session.gpu_calls(), 0);
}

#[test]
fn test_close_twice_is_idempotent() {
    let (mut session, probe) = session();
    session.open().unwrap();
    session.render().unwrap();
    assert!(probe.live_resources() > 0);

    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(probe.live_resources(), 0);
    let calls = probe.calls();

    session.close();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(probe.calls(), calls);
    assert!(matches!(session.open(), Err(SessionError::InvalidState { .. })));
}

#[test]
fn test_reshape_during_transition_keeps_progress() {
    let (mut session, _probe) = session();
    session.open().unwrap();
    let handle = session.handle();
    handle.load_preset_with(&inline("A", PRESET_A), Duration::ZERO).unwrap();
    session.render_with_delta(FRAME, OutputTarget::Surface).unwrap();

    handle.load_preset_with(&inline("B", PRESET_B), Duration::from_millis(1000)).unwrap();
    let mut progress = 0.0;
    for _ in 0..20 {
        progress = session
            .render_with_delta(FRAME, OutputTarget::Surface)
            .unwrap()
            .transition_progress
            .unwrap();
    }
    assert!((progress - 0.32).abs() < 1e-4);

    session.reshape(640, 360).unwrap();
    assert_eq!(session.engine().unwrap().size(), (640, 360));

    let stats = session.render_with_delta(FRAME, OutputTarget::Surface).unwrap();
    assert!((stats.transition_progress.unwrap() - 0.336).abs() < 1e-4);
    assert!(stats.presented);
    assert_eq!(session.read_pixels(OutputTarget::Surface).unwrap().len(), 640 * 360 * 4);
}

#[test]
fn test_rejected_preset_keeps_active() {
    let (mut session, _probe) = session();
    session.open().unwrap();
    let handle = session.handle();
    handle.load_preset_with(&inline("A", PRESET_A), Duration::ZERO).unwrap();
    session.render_with_delta(FRAME, OutputTarget::Surface).unwrap();

    assert!(handle.load_preset(&inline("bad", "per_frame_1=zoom = )")).is_err());
    assert!(handle.load_preset(&inline("shape", "shapecode_0_enabled=1")).is_err());

    let stats = session.render_with_delta(FRAME, OutputTarget::Surface).unwrap();
    assert!(stats.transition_progress.is_none());
    assert_eq!(session.store().active().unwrap().name(), "A");
}

#[test]
fn test_audio_thread_feeds_while_rendering() {
    let (mut session, _probe) = session();
    session.open().unwrap();
    let handle = session.handle();

    let producer = thread::spawn(move || {
        let block = [0.25f32; 128];
        let mut accepted = 0;
        for _ in 0..64 {
            if handle.push_audio(&block) {
                accepted += 1;
            }
            thread::sleep(Duration::from_millis(1));
        }
        accepted
    });

    for _ in 0..30 {
        session.render_with_delta(FRAME, OutputTarget::Texture).unwrap();
        thread::sleep(Duration::from_millis(2));
    }
    let accepted = producer.join().unwrap();
    session.render_with_delta(FRAME, OutputTarget::Texture).unwrap();

    let stats = session.ingest_stats().unwrap();
    assert!(accepted > 0);
    assert_eq!(stats.frames, (accepted * 128 / 512) as u64);
    assert!(session.engine().unwrap().active().unwrap().value("rms").unwrap() > 0.2);
}

#[test]
fn test_audio_after_close_is_refused() {
    let (mut session, _probe) = session();
    session.open().unwrap();
    let handle = session.handle();
    assert!(handle.push_audio(&[0.0; 64]));

    session.close();
    assert!(!handle.push_audio(&[0.0; 64]));
    assert!(matches!(
        handle.load_preset(&inline("A", PRESET_A)),
        Err(SessionError::InvalidState { .. })
    ));
}

#[test]
fn test_facade_call_sequence() {
    let mut viz = Visualizer::with_backend(config(), Box::new(NullBackend::new())).unwrap();
    assert!(viz.init_gl_window());
    assert!(viz.init_texture(128));
    assert!(viz.init_shaders());
    assert!(viz.init_engine());
    assert_eq!(viz.state(), SessionState::Ready);

    assert!(viz.add_audio(&[0.0; 512]));
    assert!(viz.load_preset_str("A", PRESET_A));
    assert!(viz.render());
    assert!(viz.render_texture());
    assert_eq!(viz.state(), SessionState::Rendering);
    assert!(viz.reshape(200, 100));
    assert_eq!(viz.read_texture().unwrap().len(), 200 * 100 * 4);

    viz.destroy_audio();
    assert_eq!(viz.state(), SessionState::Closing);
    assert!(!viz.render());
    assert_eq!(viz.last_error().unwrap().kind, ErrorKind::InvalidState);

    viz.destroy_gl();
    viz.destroy_engine();
    assert_eq!(viz.state(), SessionState::Closed);
    viz.close();
    assert_eq!(viz.state(), SessionState::Closed);
}
