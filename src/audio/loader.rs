//! Decoded audio files as an ingest source.
//!
//! Hosts without a live audio port can decode a file with Symphonia and feed
//! it to [`AudioIngest`](super::AudioIngest) block by block.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("cannot open audio file: {0}")]
    Open(#[from] std::io::Error),

    #[error("cannot decode audio: {0}")]
    Decode(#[from] SymphoniaError),

    #[error("file has no decodable audio track")]
    NoTrack,

    #[error("audio track does not declare a sample rate")]
    UnknownSampleRate,
}

/// Interleaved PCM decoded from a file.
#[derive(Debug, Clone)]
pub struct AudioData {
    /// Interleaved samples in -1.0..1.0
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

impl AudioData {
    /// Frames per channel.
    pub fn num_frames(&self) -> usize {
        self.samples.len().checked_div(self.channels).unwrap_or(0)
    }

    /// Length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.num_frames() as f64 / f64::from(self.sample_rate)
    }

    /// Remap to `channels` interleaved channels.
    ///
    /// Downmixing averages every source channel; upmixing copies the mono mix
    /// into each output channel.
    pub fn to_channels(&self, channels: usize) -> AudioData {
        let channels = channels.max(1);
        if channels == self.channels || self.channels == 0 {
            return self.clone();
        }

        let scale = 1.0 / self.channels as f32;
        let samples = self
            .samples
            .chunks_exact(self.channels)
            .map(|frame| frame.iter().sum::<f32>() * scale)
            .flat_map(|mono| std::iter::repeat(mono).take(channels))
            .collect();

        AudioData {
            samples,
            sample_rate: self.sample_rate,
            channels,
        }
    }

    /// Interleaved blocks of `frames_per_block` frames, the way a real-time
    /// callback would deliver them. The last block may be shorter.
    pub fn blocks(&self, frames_per_block: usize) -> impl Iterator<Item = &[f32]> {
        let len = frames_per_block.max(1) * self.channels.max(1);
        self.samples.chunks(len)
    }
}

/// Container reader plus decoder for the first audio track of a file.
struct TrackReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
}

impl TrackReader {
    fn open(path: &Path) -> Result<Self, AudioError> {
        let source = MediaSourceStream::new(Box::new(File::open(path)?), Default::default());
        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let format = symphonia::default::get_probe()
            .format(&hint, source, &FormatOptions::default(), &MetadataOptions::default())?
            .format;

        let params = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .map(|t| (t.id, t.codec_params.clone()))
            .ok_or(AudioError::NoTrack)?;
        let (track_id, params) = params;
        let sample_rate = params.sample_rate.ok_or(AudioError::UnknownSampleRate)?;
        let channels = params.channels.map_or(2, |c| c.count());
        let decoder = symphonia::default::get_codecs().make(&params, &DecoderOptions::default())?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
        })
    }

    /// Next packet of our track, or `None` at end of stream.
    fn next_packet(&mut self) -> Result<Option<Packet>, AudioError> {
        loop {
            match self.format.next_packet() {
                Ok(packet) if packet.track_id() == self.track_id => return Ok(Some(packet)),
                Ok(_) => continue,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(SymphoniaError::ResetRequired) => self.decoder.reset(),
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn read_to_end(mut self) -> Result<AudioData, AudioError> {
        let mut samples = Vec::new();
        let mut scratch: Option<SampleBuffer<f32>> = None;

        while let Some(packet) = self.next_packet()? {
            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(reason)) => {
                    log::debug!("dropping corrupt packet: {}", reason);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let scratch = scratch.get_or_insert_with(|| SampleBuffer::new(decoded.capacity() as u64, *decoded.spec()));
            scratch.copy_interleaved_ref(decoded);
            samples.extend_from_slice(scratch.samples());
        }

        Ok(AudioData {
            samples,
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }
}

/// Decode an audio file to interleaved f32.
///
/// ```no_run
/// use auralis::audio::loader::load_audio;
/// use std::path::Path;
///
/// let audio = load_audio(Path::new("song.flac")).unwrap();
/// println!("{:.2}s at {} Hz", audio.duration(), audio.sample_rate);
/// ```
pub fn load_audio(path: &Path) -> Result<AudioData, AudioError> {
    let audio = TrackReader::open(path)?.read_to_end()?;
    log::info!(
        "Decoded {}: {} ch @ {} Hz, {:.2}s",
        path.display(),
        audio.channels,
        audio.sample_rate,
        audio.duration()
    );
    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo_second() -> AudioData {
        AudioData {
            samples: vec![0.0; 44100 * 2],
            sample_rate: 44100,
            channels: 2,
        }
    }

    #[test]
    fn test_audio_data_duration() {
        let audio = stereo_second();
        assert!((audio.duration() - 1.0).abs() < 0.001);
        assert_eq!(audio.num_frames(), 44100);
    }

    #[test]
    fn test_zero_channels_is_empty() {
        let audio = AudioData {
            samples: vec![0.0; 8],
            sample_rate: 44100,
            channels: 0,
        };
        assert_eq!(audio.num_frames(), 0);
        assert_eq!(audio.duration(), 0.0);
    }

    #[test]
    fn test_to_channels_downmix() {
        let audio = AudioData {
            samples: vec![0.5, -0.5, 1.0, 0.0],
            sample_rate: 44100,
            channels: 2,
        };
        let mono = audio.to_channels(1);
        assert_eq!(mono.channels, 1);
        assert_eq!(mono.samples, vec![0.0, 0.5]);
    }

    #[test]
    fn test_blocks_cover_all_samples() {
        let audio = stereo_second();
        let blocks: Vec<&[f32]> = audio.blocks(512).collect();
        assert_eq!(blocks[0].len(), 1024);
        assert_eq!(blocks.iter().map(|b| b.len()).sum::<usize>(), audio.samples.len());
    }

    #[test]
    fn test_missing_file_is_open_error() {
        let result = load_audio(Path::new("/nonexistent/track.wav"));
        assert!(matches!(result, Err(AudioError::Open(_))));
    }
}
