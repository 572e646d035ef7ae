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

//! Turns a byte-oriented PCM stream into uniformly-sized, stream-time
//! tagged chunks. Sits upstream of the packetizer; the two share the
//! `chunk_size_bytes` stored in `AudioConfig`, which is why
//! `decrement_payload_size` lives here rather than on the packetizer.

use std::io::Read;

use tracing::warn;

use crate::audio::AudioConfig;
use crate::clock::WallClock;

/// Consecutive zeroed chunks required before the reader calls it
/// "entering silence".
const SILENCE_ENTRY_CHUNKS: u32 = 20;

/// One emitted unit: a PCM payload tagged with the wall-clock instant its
/// first sample represents.
pub struct TimedChunk {
    pub stream_time: f64,
    pub chunk: Vec<u8>,
}

pub struct SampleReader<C: WallClock> {
    clock: C,
    config: AudioConfig,
    carry: Vec<u8>,
    stream_time: Option<f64>,
    silent_run: u32,
    in_silence: bool,
}

impl<C: WallClock> SampleReader<C> {
    pub fn new(clock: C, config: AudioConfig) -> Self {
        Self {
            clock,
            config,
            carry: Vec::new(),
            stream_time: None,
            silent_run: 0,
            in_silence: false,
        }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Read exactly one chunk from `source`, blocking until enough bytes
    /// accumulate (or the source is exhausted). Returns `None` at EOF with
    /// nothing left to flush.
    ///
    /// A run of leading silent chunks carries no `stream_time` anchor yet
    /// (nothing to clock them against), so this loops internally rather
    /// than emitting untagged chunks.
    pub fn read_chunk(&mut self, source: &mut dyn Read) -> std::io::Result<Option<TimedChunk>> {
        loop {
            let want = self.config.chunk_size_bytes();
            while self.carry.len() < want {
                let mut buf = vec![0u8; want - self.carry.len()];
                let n = source.read(&mut buf)?;
                if n == 0 {
                    if self.carry.is_empty() {
                        return Ok(None);
                    }
                    break;
                }
                self.carry.extend_from_slice(&buf[..n]);
            }

            let take = want.min(self.carry.len());
            let chunk: Vec<u8> = self.carry.drain(..take).collect();
            if chunk.is_empty() {
                return Ok(None);
            }

            if self.is_silent(&chunk) {
                self.silent_run += 1;
                if self.silent_run >= SILENCE_ENTRY_CHUNKS {
                    self.in_silence = true;
                }
                if self.in_silence {
                    // Sustained silence: keep reading but stop emitting,
                    // matching the sender's idle gating.
                    continue;
                }
            } else {
                self.silent_run = 0;
                if self.in_silence {
                    self.in_silence = false;
                }
                // A non-silent chunk after a gap (no stream_time yet, or we
                // just exited silence) re-anchors to wall time.
                if self.stream_time.is_none() {
                    self.stream_time = Some(self.clock.now_secs());
                }
            }

            let Some(mut stream_time) = self.stream_time else {
                // Still inside (or just entering) silence with no anchor
                // yet; nothing to stamp until a non-silent chunk arrives.
                continue;
            };

            let now = self.clock.now_secs();
            let max_behind = (self.config.latency_secs() / 2.0).max(1.0);
            if now - stream_time > max_behind {
                // Input underflow: the reader fell behind real time by more
                // than half the configured latency budget. Re-anchor rather
                // than emit a stream of chunks stamped increasingly in the past.
                warn!(
                    "sample reader fell behind by {:.3}s, resetting stream time",
                    now - stream_time
                );
                stream_time = now;
            }

            self.stream_time = Some(stream_time + self.config.chunk_time_secs());

            return Ok(Some(TimedChunk { stream_time, chunk }));
        }
    }

    pub fn in_silence(&self) -> bool {
        self.in_silence
    }

    fn is_silent(&self, chunk: &[u8]) -> bool {
        match (chunk.first(), chunk.last()) {
            (Some(0), Some(0)) => chunk.iter().all(|&b| b == 0),
            _ => false,
        }
    }

    /// MTU back-off: shrink the chunk size by one byte (re-rounded to
    /// a frame multiple), drop whatever is mid-flight in
    /// `carry` so the next read starts clean at the new size, and return
    /// the resulting on-wire datagram length for the caller's logging.
    pub fn decrement_payload_size(&mut self) -> usize {
        let current = self.config.chunk_size_bytes();
        self.config.set_chunk_size_bytes(current.saturating_sub(1));
        self.carry.clear();
        self.config.chunk_size_bytes()
    }
}
