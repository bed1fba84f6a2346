//! Example: Render a preset offscreen from an audio file or a synthetic click track.
//!
//! Feeds audio at the frame cadence, renders a few seconds of frames to the
//! output texture and saves the last one as a PNG.
//!
//! Run with:
//!     cargo run --example render_preset -- [preset.milk] [audio.wav] [out.png]

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use auralis::audio::synth::{generate_click_track, interleave};
use auralis::audio::{load_audio, AudioData};
use auralis::preset::PresetSource;
use auralis::render::OutputTarget;
use auralis::{EngineConfig, Session};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let preset = args.next().map(PathBuf::from);
    let audio_path = args.next().map(PathBuf::from);
    let output = args.next().map_or_else(|| PathBuf::from("auralis_frame.png"), PathBuf::from);

    let config = EngineConfig {
        width: 640,
        height: 360,
        fps: 30,
        ..EngineConfig::default()
    };

    let audio = match &audio_path {
        Some(path) => load_audio(path)
            .with_context(|| format!("loading {}", path.display()))?
            .to_channels(config.channels),
        None => AudioData {
            samples: interleave(
                &generate_click_track(120.0, config.sample_rate, 4.0, 80.0),
                config.channels,
            ),
            sample_rate: config.sample_rate,
            channels: config.channels,
        },
    };
    if audio.sample_rate != config.sample_rate {
        bail!(
            "audio is {} Hz, the engine is configured for {} Hz",
            audio.sample_rate,
            config.sample_rate
        );
    }
    println!("Audio: {:.2}s, {} channel(s)", audio.duration(), audio.channels);

    let mut session = Session::new(config.clone())?;
    session.open()?;
    let handle = session.handle();

    if let Some(path) = &preset {
        let loaded = handle.load_preset_with(&PresetSource::Path(path.clone()), Duration::ZERO)?;
        println!("Preset: {}", loaded.name());
    }

    let frame_time = config.frame_interval();
    let frames_per_block = (config.sample_rate / config.fps) as usize;
    let mut dropped = 0;
    for (i, block) in audio.blocks(frames_per_block).enumerate() {
        if !handle.push_audio(block) {
            dropped += 1;
        }
        let stats = session.render_with_delta(frame_time, OutputTarget::Texture)?;
        if i % config.fps as usize == 0 {
            println!(
                "  frame {:4}  t={:5.2}s  audio #{}  degraded={}",
                stats.frame, stats.time, stats.audio_sequence, stats.degraded
            );
        }
    }

    let pixels = session.read_pixels(OutputTarget::Texture)?;
    save_png(&output, &pixels, config.width, config.height)?;
    println!("Saved {} ({} dropped audio blocks)", output.display(), dropped);

    session.close();
    Ok(())
}

fn save_png(path: &Path, rgba: &[u8], width: u32, height: u32) -> Result<()> {
    image::save_buffer(path, rgba, width, height, image::ExtendedColorType::Rgba8)
        .with_context(|| format!("writing {}", path.display()))
}
