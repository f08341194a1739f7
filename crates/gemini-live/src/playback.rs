//! FIFO playback of decoded audio segments.
//!
//! At most one buffer is handed to the sink at a time; the sink signals
//! completion through a oneshot and the scheduler chains the next start from
//! that signal. Queued segments are coalesced (bounded, order-preserving)
//! into one contiguous buffer so short network chunks don't produce choppy
//! playback.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::audio;

/// Up to this many queued segments are merged into one sink buffer.
const COALESCE_MAX: usize = 3;

/// One decoded unit of playback audio.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Output-device abstraction. `play` must eventually resolve `done` (sending
/// or dropping it both count as completion); `stop` must be safe to call when
/// nothing is rendering.
pub trait AudioSink: Send {
    fn play(&mut self, samples: Vec<f32>, sample_rate: u32, done: oneshot::Sender<()>);
    fn stop(&mut self);
}

pub struct PlaybackScheduler {
    queue: VecDeque<AudioSegment>,
    playing: bool,
    /// Bumped on interrupt so completions from a stopped render are ignored.
    generation: u64,
    sink: Box<dyn AudioSink>,
    done_tx: mpsc::Sender<u64>,
    on_level: Arc<dyn Fn(f32) + Send + Sync>,
    on_playing: Arc<dyn Fn(bool) + Send + Sync>,
}

impl PlaybackScheduler {
    pub fn new(
        sink: Box<dyn AudioSink>,
        done_tx: mpsc::Sender<u64>,
        on_level: Arc<dyn Fn(f32) + Send + Sync>,
        on_playing: Arc<dyn Fn(bool) + Send + Sync>,
    ) -> Self {
        Self {
            queue: VecDeque::new(),
            playing: false,
            generation: 0,
            sink,
            done_tx,
            on_level,
            on_playing,
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Adds a segment; starts playback immediately when nothing is rendering.
    pub fn enqueue(&mut self, segment: AudioSegment) {
        self.queue.push_back(segment);
        if !self.playing {
            self.start_next();
        }
    }

    /// Completion of the buffer started under `generation`. Stale generations
    /// belong to renders that were interrupted and are discarded.
    pub fn on_segment_done(&mut self, generation: u64) {
        if generation != self.generation {
            tracing::trace!("stale playback completion ignored");
            return;
        }
        if self.queue.is_empty() {
            self.playing = false;
            (self.on_playing)(false);
        } else {
            self.start_next();
        }
    }

    /// Stops the current render and discards everything queued.
    pub fn interrupt(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.sink.stop();
        self.queue.clear();
        if self.playing {
            self.playing = false;
            (self.on_playing)(false);
        }
    }

    fn start_next(&mut self) {
        let mut samples: Vec<f32> = Vec::new();
        let mut rate: Option<u32> = None;
        let mut taken = 0;
        while taken < COALESCE_MAX {
            match self.queue.front() {
                Some(segment) if rate.is_none() || rate == Some(segment.sample_rate) => {
                    let segment = self.queue.pop_front().expect("front exists");
                    rate.get_or_insert(segment.sample_rate);
                    samples.extend_from_slice(&segment.samples);
                    taken += 1;
                }
                _ => break,
            }
        }
        let Some(rate) = rate else { return };
        if samples.is_empty() {
            return;
        }

        if !self.playing {
            self.playing = true;
            (self.on_playing)(true);
        }
        (self.on_level)(audio::level_of(&samples));

        let (done, done_rx) = oneshot::channel();
        let forward = self.done_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            // A dropped sender also counts as completion; the generation
            // check filters out anything stopped by an interrupt.
            let _ = done_rx.await;
            let _ = forward.send(generation).await;
        });
        self.sink.play(samples, rate, done);
    }
}
