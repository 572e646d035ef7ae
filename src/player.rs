/*
 *  Copyright (C) 2026 The WaveSync Authors
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! The playback scheduler — the hardest part of the system. Reconciles
//! wall-clock `now`, the sound-card write position, and each chunk's
//! `future_ts` so every receiver in the fleet emits the same sample at
//! the same instant. Runs on a dedicated OS thread because sink writes
//! and deadline sleeps are blocking suspension points.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::audio::AudioConfig;
use crate::clock::WallClock;
use crate::queue::{ChunkQueueConsumer, QueueEntry};
use crate::sink::AudioSink;
use crate::stats::Stats;
use crate::utils::AverageCalculationBuffer;

/// `Drops(n)` beyond this forces a resync rather than leaving it to the
/// RED policy.
const RESYNC_DROP_THRESHOLD: u32 = 200;
/// How many subsequent audio datagrams the receiver suppresses after a
/// resync.
const RESYNC_SUPPRESS_PACKETS: u32 = 60;
const OUTPUT_STUCK_WATCHDOG: Duration = Duration::from_millis(200);
const OUTPUT_STUCK_BACKOFF: Duration = Duration::from_secs(1);
const IDLE_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingConfig,
    Idle,
    Playing,
    Resyncing,
}

enum ScheduleDecision {
    Proceed,
    Drop,
    Resync,
}

pub struct ChunkPlayer<C: WallClock, S: AudioSink> {
    clock: C,
    sink: S,
    queue: ChunkQueueConsumer,
    stats: Stats,
    state: State,
    config: Option<AudioConfig>,
    tolerance_s: f64,
    max_delay_s: f64,
    silence_cache: Option<(AudioConfig, Vec<u8>)>,
    stop: Arc<AtomicBool>,
    drift_avg: AverageCalculationBuffer<f64>,
    output_stuck_since: Option<Instant>,
}

impl<C: WallClock, S: AudioSink> ChunkPlayer<C, S> {
    pub fn new(clock: C, sink: S, queue: ChunkQueueConsumer, stats: Stats, tolerance_ms: u32, stop: Arc<AtomicBool>) -> Self {
        Self {
            clock,
            sink,
            queue,
            stats,
            state: State::AwaitingConfig,
            config: None,
            tolerance_s: tolerance_ms as f64 / 1000.0,
            max_delay_s: 0.0,
            silence_cache: None,
            stop,
            drift_avg: AverageCalculationBuffer::new(64),
            output_stuck_since: None,
        }
    }

    pub fn run(&mut self) {
        while !self.stop.load(Ordering::Relaxed) {
            match self.state {
                State::AwaitingConfig => self.await_config(),
                State::Idle | State::Playing => self.step(),
                State::Resyncing => self.resync(),
            }
        }
    }

    fn await_config(&mut self) {
        match self.queue.next_blocking() {
            Some(QueueEntry::Config(cfg)) => self.reconfigure(cfg),
            Some(_) => {} // audio/drops before a config is known: nothing to do with them yet.
            None => self.stop.store(true, Ordering::Relaxed),
        }
    }

    fn step(&mut self) {
        match self.queue.try_next() {
            Some(QueueEntry::Config(cfg)) => self.reconfigure(cfg),
            Some(QueueEntry::Drops(n)) => self.handle_drops(n),
            Some(QueueEntry::Audio { due_at, chunk }) => self.play_chunk(due_at, chunk),
            None => {
                self.fill_silence();
                if self.state == State::Playing {
                    self.state = State::Idle;
                }
                thread::sleep(IDLE_POLL);
            }
        }
    }

    fn reconfigure(&mut self, cfg: AudioConfig) {
        self.sink.close();
        if let Err(e) = self.sink.open(&cfg) {
            // Sink open failure has no recovery path.
            panic!("audio sink failed to open: {e}");
        }
        self.max_delay_s = (2000.0 + cfg.sink_latency_ms as f64 + cfg.latency_ms as f64) / 1000.0;
        self.config = Some(cfg);
        self.silence_cache = None;
        self.state = State::Idle;
        info!(?cfg, max_delay_s = self.max_delay_s, "sink reconfigured");
    }

    fn handle_drops(&mut self, n: u32) {
        if n > RESYNC_DROP_THRESHOLD {
            self.state = State::Resyncing;
        }
        // n <= 200: no action, the RED policy in play_chunk corrects drift.
    }

    fn resync(&mut self) {
        let handle = self.queue.handle();
        // Drain the queue, preserving the last Config.
        while let Some(entry) = self.queue.try_next() {
            if let QueueEntry::Config(cfg) = entry {
                self.config = Some(cfg);
            }
        }
        handle.set_ignore_audio_packets(RESYNC_SUPPRESS_PACKETS);
        handle.clear_last_sender_chunk_no();
        self.stats.resync();
        warn!("resyncing: queue cleared, suppressing next {RESYNC_SUPPRESS_PACKETS} packets");
        self.state = State::Idle;
    }

    fn play_chunk(&mut self, due_at: f64, chunk: Vec<u8>) {
        self.state = State::Playing;
        let Some(cfg) = self.config else {
            // Shouldn't happen (AwaitingConfig gates this) but fail safe.
            return;
        };

        match self.schedule(due_at, &cfg) {
            ScheduleDecision::Resync => {
                self.state = State::Resyncing;
                return;
            }
            ScheduleDecision::Drop => {
                self.stats.chunks_dropped(1);
                return;
            }
            ScheduleDecision::Proceed => {}
        }

        self.wait_for_sink_space(chunk.len() / cfg.frame_size().max(1));
        if let Err(e) = self.sink.write(&chunk) {
            warn!("sink write failed: {e}");
            self.state = State::Resyncing;
            return;
        }
        self.stats.chunk_played();
    }

    /// Sleep out early chunks, RED-drop late ones, resync on
    /// clock-rollover-scale earliness.
    fn schedule(&mut self, due_at: f64, cfg: &AudioConfig) -> ScheduleDecision {
        let desired = due_at - cfg.sink_latency_secs();
        let delay = desired - self.clock.now_secs();

        if delay > self.max_delay_s {
            return ScheduleDecision::Resync;
        }
        if delay > 0.001 {
            thread::sleep(Duration::from_secs_f64((delay - 0.001).max(0.001)));
        }

        let delay = desired - self.clock.now_secs();
        if let Some(avg) = self.drift_avg.update(delay.abs()) {
            debug!(average_drift_s = avg, "playback drift");
        }

        let mid_tolerance = self.tolerance_s / 2.0;
        if delay < -mid_tolerance {
            let severity = ((delay.abs() - mid_tolerance) / mid_tolerance).min(1.0);
            if rand::rng().random::<f64>() < severity {
                return ScheduleDecision::Drop;
            }
        }

        ScheduleDecision::Proceed
    }

    fn wait_for_sink_space(&mut self, frames_needed: usize) {
        loop {
            if self.sink.write_available_frames() >= frames_needed {
                self.output_stuck_since = None;
                return;
            }
            let since = *self.output_stuck_since.get_or_insert_with(Instant::now);
            if since.elapsed() > OUTPUT_STUCK_WATCHDOG {
                warn!("output stuck");
                thread::sleep(OUTPUT_STUCK_BACKOFF);
                self.output_stuck_since = None;
            } else {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// Silence chunks are computed once per config and cached.
    fn fill_silence(&mut self) {
        let Some(cfg) = self.config else { return };
        let frames = self.sink.write_available_frames();
        if frames == 0 {
            return;
        }
        let frame_size = cfg.frame_size();
        let needed_bytes = frames * frame_size;

        let cache_matches = matches!(&self.silence_cache, Some((c, _)) if *c == cfg);
        if !cache_matches {
            self.silence_cache = Some((cfg, vec![0u8; needed_bytes.max(frame_size)]));
        }
        let (_, cache) = self.silence_cache.as_mut().expect("just set above");
        if cache.len() < needed_bytes {
            cache.resize(needed_bytes, 0);
        }

        if let Err(e) = self.sink.write(&cache[..needed_bytes]) {
            warn!("silence write failed: {e}");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::SampleBits;
    use crate::clock::FakeClock;
    use crate::queue::chunk_queue;
    use crate::sink::TestSink;

    fn cfg() -> AudioConfig {
        AudioConfig::new(44_100, SampleBits::Bits16, 2, 1000, 0, 16).unwrap()
    }

    fn make_player() -> (ChunkPlayer<FakeClock, TestSink>, crate::queue::ChunkQueueProducer) {
        let (producer, consumer) = chunk_queue(16);
        let clock = FakeClock::at(1000.0);
        let sink = TestSink::new(4096);
        let stop = Arc::new(AtomicBool::new(false));
        (
            ChunkPlayer::new(clock, sink, consumer, Stats::default(), 15, stop),
            producer,
        )
    }

    #[test]
    fn starts_in_awaiting_config_and_opens_sink_on_first_config() {
        let (mut player, producer) = make_player();
        assert_eq!(player.state, State::AwaitingConfig);
        producer.push_blocking(QueueEntry::Config(cfg()));
        player.await_config();
        assert_eq!(player.state, State::Idle);
        assert_eq!(player.config, Some(cfg()));
    }

    #[test]
    fn on_time_chunk_is_written_immediately() {
        let (mut player, producer) = make_player();
        producer.push_blocking(QueueEntry::Config(cfg()));
        player.await_config();

        let now = player.clock.now_secs();
        producer.push_blocking(QueueEntry::Audio {
            due_at: now, // already due (after subtracting zero sink latency)
            chunk: vec![9u8; 16],
        });
        player.step();
        assert_eq!(player.sink.writes.last(), Some(&vec![9u8; 16]));
        assert_eq!(player.state, State::Playing);
    }

    #[test]
    fn huge_drops_trigger_resync_and_suppression() {
        let (mut player, producer) = make_player();
        producer.push_blocking(QueueEntry::Config(cfg()));
        player.await_config();
        let handle = producer.handle();

        producer.push_blocking(QueueEntry::Drops(201));
        player.step();
        assert_eq!(player.state, State::Resyncing);
        player.resync();
        assert_eq!(handle.ignore_audio_packets(), RESYNC_SUPPRESS_PACKETS);
        assert_eq!(player.state, State::Idle);
    }

    #[test]
    fn small_drops_are_a_no_op() {
        let (mut player, producer) = make_player();
        producer.push_blocking(QueueEntry::Config(cfg()));
        player.await_config();
        producer.push_blocking(QueueEntry::Drops(50));
        player.step();
        assert_eq!(player.state, State::Idle);
    }

    #[test]
    fn idle_with_empty_queue_writes_silence() {
        let (mut player, producer) = make_player();
        producer.push_blocking(QueueEntry::Config(cfg()));
        player.await_config();
        player.step();
        assert!(!player.sink.writes.is_empty());
    }

    #[test]
    fn resync_preserves_the_most_recent_config_while_draining() {
        let (mut player, producer) = make_player();
        producer.push_blocking(QueueEntry::Config(cfg()));
        player.await_config();

        let other_cfg = AudioConfig::new(48_000, SampleBits::Bits16, 2, 1000, 0, 16).unwrap();
        producer.push_blocking(QueueEntry::Audio { due_at: 1.0, chunk: vec![0u8; 16] });
        producer.push_blocking(QueueEntry::Config(other_cfg));
        player.state = State::Resyncing;
        player.resync();
        assert_eq!(player.config, Some(other_cfg));
    }

    #[test]
    fn grossly_early_chunk_triggers_resync() {
        let (mut player, producer) = make_player();
        producer.push_blocking(QueueEntry::Config(cfg()));
        player.await_config();
        let now = player.clock.now_secs();
        producer.push_blocking(QueueEntry::Audio {
            due_at: now + 10_000.0,
            chunk: vec![1u8; 16],
        });
        player.step();
        assert_eq!(player.state, State::Resyncing);
    }
}
