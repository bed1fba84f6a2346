//! Benchmarks for preset parsing and equation evaluation.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use auralis::preset::PresetStore;
use auralis::render::{FrameInputs, NullBackend, OutputTarget, PresetRuntime, RenderEngine};
use auralis::{AudioFrame, EngineConfig};

const SPIRAL: &str = "\
name=Spiral
fDecay=0.96
nWaveMode=1
per_frame_init_1=phase = 0;
per_frame_1=phase = phase + 0.05 + 0.1 * bass;
per_frame_2=rot = 0.04 * sin(phase);
per_frame_3=wave_r = 0.5 + 0.5 * sin(time * 1.3);
per_frame_4=q1 = beat * 0.5 + q1 * 0.5;
per_pixel_1=zoom = zoom + 0.03 * rad * cos(ang * 3 + time);
per_pixel_2=rot = rot + 0.01 * sin(rad * 10 - time * 2);
";

fn inputs(frame: u64) -> FrameInputs {
    FrameInputs {
        time: frame as f64 / 60.0,
        frame,
        fps: 60.0,
        bass: 1.0 + (frame as f64 * 0.1).sin(),
        ..Default::default()
    }
}

fn bench_parse(c: &mut Criterion) {
    let store = PresetStore::default();
    c.bench_function("parse_preset", |b| {
        b.iter(|| black_box(store.load_str("spiral", black_box(SPIRAL)).unwrap()));
    });
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("Preset Evaluation");
    let preset = PresetStore::default().load_str("spiral", SPIRAL).unwrap();

    for (cols, rows) in [(8, 6), (32, 24), (64, 48)] {
        let vertices = ((cols + 1) * (rows + 1)) as u64;
        group.throughput(Throughput::Elements(vertices));
        group.bench_with_input(
            BenchmarkId::new("evaluate", format!("{}x{}", cols, rows)),
            &(cols, rows),
            |b, &(cols, rows)| {
                let mut runtime = PresetRuntime::new(preset.clone(), cols, rows);
                let mut frame = 0;
                b.iter(|| {
                    frame += 1;
                    black_box(*runtime.evaluate(&inputs(frame)));
                });
            },
        );
    }

    group.finish();
}

fn bench_render_frame(c: &mut Criterion) {
    let config = EngineConfig::default();
    let store = PresetStore::default();
    store.activate(store.load_str("spiral", SPIRAL).unwrap(), Duration::ZERO);

    let mut engine = RenderEngine::new(Box::new(NullBackend::new()), &config);
    engine.initialize(config.width, config.height).unwrap();
    engine.seed_texture(config.texture_size).unwrap();
    engine.prepare_shaders().unwrap();
    let audio = AudioFrame::silent(config.fft_size, config.channels, config.sample_rate);

    c.bench_function("render_frame_null_backend", |b| {
        b.iter(|| {
            black_box(
                engine
                    .render_frame(&audio, &store, Duration::from_millis(16), OutputTarget::Surface)
                    .unwrap(),
            )
        });
    });
}

criterion_group!(benches, bench_parse, bench_evaluate, bench_render_frame);
criterion_main!(benches);
