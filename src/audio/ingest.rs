//! Non-blocking PCM ingest.
//!
//! The audio producer writes interleaved samples into a heap ring buffer and
//! the analysis cadence drains it in whole windows. Each half of the ring is
//! owned by exactly one cadence; the `Mutex` around it is only ever taken with
//! `try_lock`, so a second concurrent producer drops its block instead of
//! waiting. Completed frames are published through an `ArcSwap`, which the
//! render cadence reads without locking.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use arc_swap::ArcSwap;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use serde::Serialize;

use super::analysis::{downmix_into, WindowAnalyzer};
use super::frame::AudioFrame;
use super::AnalyzerError;
use crate::config::EngineConfig;

/// How long the analysis worker sleeps when the ring has no full window.
const WORKER_IDLE: Duration = Duration::from_millis(2);

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Frames analyzed and published so far.
    pub frames: u64,
    /// Pushed blocks rejected because the ring was full (audio overruns).
    pub dropped_blocks: u64,
}

struct AnalysisSide {
    consumer: HeapCons<f32>,
    analyzer: WindowAnalyzer,
    interleaved: Vec<f32>,
    mono: Vec<f32>,
}

struct Shared {
    producer: Mutex<HeapProd<f32>>,
    analysis: Mutex<AnalysisSide>,
    latest: ArcSwap<AudioFrame>,
    sequence: AtomicU64,
    dropped_blocks: AtomicU64,
    closed: AtomicBool,
    channels: usize,
    block_len: usize,
    worker_thread: OnceLock<Thread>,
}

impl Shared {
    fn push(&self, samples: &[f32]) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        // Only whole interleaved frames enter the ring so channel alignment holds.
        let usable = samples.len() - samples.len() % self.channels;
        if usable == 0 {
            return true;
        }

        let Ok(mut producer) = self.producer.try_lock() else {
            self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let vacant = producer.vacant_len();
        let block = if usable > producer.capacity().get() {
            // Larger than the whole ring: keep the newest frames that fit now
            // and count the rest as one dropped block.
            let fit = vacant - vacant % self.channels;
            self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
            if fit == 0 {
                return false;
            }
            &samples[usable - fit..usable]
        } else if vacant < usable {
            self.dropped_blocks.fetch_add(1, Ordering::Relaxed);
            return false;
        } else {
            &samples[..usable]
        };
        producer.push_slice(block);
        drop(producer);

        if let Some(worker) = self.worker_thread.get() {
            worker.unpark();
        }
        true
    }

    fn process_pending(&self) -> usize {
        let Ok(mut side) = self.analysis.try_lock() else {
            return 0;
        };
        let side = &mut *side;

        let mut processed = 0;
        while side.consumer.occupied_len() >= self.block_len {
            side.interleaved.resize(self.block_len, 0.0);
            side.consumer.pop_slice(&mut side.interleaved);
            downmix_into(&side.interleaved, self.channels, &mut side.mono);

            let sequence = self.sequence.load(Ordering::Relaxed) + 1;
            let frame = side.analyzer.analyze(&side.mono, sequence);
            self.latest.store(Arc::new(frame));
            // Publish the counter after the frame so readers never see a
            // sequence ahead of `latest`.
            self.sequence.store(sequence, Ordering::Release);
            processed += 1;
        }
        processed
    }
}

/// Accepts PCM from an external producer and publishes analyzed frames.
pub struct AudioIngest {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AudioIngest {
    /// Create an ingest sized from `config`. Spawns the analysis worker when
    /// `config.analysis_thread` is set.
    pub fn new(config: &EngineConfig) -> Result<Self, AnalyzerError> {
        let channels = config.channels.max(1);
        let analyzer = WindowAnalyzer::new(
            config.fft_size,
            channels,
            config.sample_rate,
            config.beat_sensitivity,
        )?;
        let block_len = config.fft_size * channels;
        let capacity = block_len * config.ring_capacity_blocks.max(1);

        let (producer, consumer) = HeapRb::<f32>::new(capacity).split();

        let shared = Arc::new(Shared {
            producer: Mutex::new(producer),
            analysis: Mutex::new(AnalysisSide {
                consumer,
                analyzer,
                interleaved: Vec::with_capacity(block_len),
                mono: Vec::with_capacity(config.fft_size),
            }),
            latest: ArcSwap::from_pointee(AudioFrame::silent(
                config.fft_size,
                channels,
                config.sample_rate,
            )),
            sequence: AtomicU64::new(0),
            dropped_blocks: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            channels,
            block_len,
            worker_thread: OnceLock::new(),
        });

        let worker = if config.analysis_thread {
            let worker_shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name("auralis-analysis".into())
                .spawn(move || {
                    while !worker_shared.closed.load(Ordering::Acquire) {
                        if worker_shared.process_pending() == 0 {
                            thread::park_timeout(WORKER_IDLE);
                        }
                    }
                })
                .map_err(|e| AnalyzerError::WorkerSpawn(e.to_string()))?;
            let _ = shared.worker_thread.set(handle.thread().clone());
            Some(handle)
        } else {
            None
        };

        log::debug!(
            "Audio ingest ready: {} ch @ {} Hz, window {}, ring {} samples",
            channels,
            config.sample_rate,
            config.fft_size,
            capacity
        );

        Ok(Self {
            shared,
            worker: Mutex::new(worker),
        })
    }

    /// Enqueue interleaved samples. Never blocks.
    ///
    /// Returns `false` when the block was dropped, either because the ring is
    /// full, another producer holds it, or the ingest is stopped.
    pub fn push(&self, samples: &[f32]) -> bool {
        self.shared.push(samples)
    }

    /// Most recent complete frame, or the silent frame before any analysis.
    pub fn latest(&self) -> Arc<AudioFrame> {
        self.shared.latest.load_full()
    }

    /// Analyze every complete window currently queued. Returns the number of
    /// frames published. Used directly when no analysis thread is running.
    pub fn process_pending(&self) -> usize {
        self.shared.process_pending()
    }

    /// Monotonic count of published frames.
    pub fn frame_counter(&self) -> u64 {
        self.shared.sequence.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            frames: self.frame_counter(),
            dropped_blocks: self.shared.dropped_blocks.load(Ordering::Relaxed),
        }
    }

    /// Samples per analysis window, across all channels.
    pub fn block_len(&self) -> usize {
        self.shared.block_len
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop accepting samples and join the analysis worker. Idempotent.
    pub fn stop(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let handle = match self.worker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.thread().unpark();
            if handle.join().is_err() {
                log::warn!("Audio analysis worker panicked during shutdown");
            }
        }
        log::debug!("Audio ingest stopped");
    }
}

impl Drop for AudioIngest {
    fn drop(&mut self) {
        self.stop();
    }
}
