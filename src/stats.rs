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

//! Counters and periodic reporting. No OpenTelemetry export — just
//! atomics fed by the hot paths and a reporter task that logs a summary
//! line on an interval.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::info;

#[derive(Debug, Default)]
struct Counters {
    chunks_sent: AtomicU64,
    chunks_received: AtomicU64,
    chunks_dropped: AtomicU64,
    chunks_played: AtomicU64,
    resyncs: AtomicU32,
    compressed_sent: AtomicU64,
    compression_cancelled: AtomicU64,
    bytes_raw: AtomicU64,
    bytes_wire: AtomicU64,
}

/// A cheap, cloneable handle every component holds to bump its own
/// counters. All fields are independent atomics; a snapshot is a plain
/// read, not a lock.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    counters: Arc<Counters>,
}

impl Stats {
    pub fn chunk_sent(&self) {
        self.counters.chunks_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_received(&self) {
        self.counters.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunks_dropped(&self, n: u32) {
        self.counters.chunks_dropped.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn chunk_played(&self) {
        self.counters.chunks_played.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resync(&self) {
        self.counters.resyncs.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one compression attempt. `compressed` is `None` when the
    /// packetizer fell back to sending the raw chunk ("cancelled
    /// compression").
    pub fn compression_attempt(&self, raw_len: usize, compressed: Option<usize>) {
        self.counters
            .bytes_raw
            .fetch_add(raw_len as u64, Ordering::Relaxed);
        match compressed {
            Some(wire_len) => {
                self.counters.compressed_sent.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_wire
                    .fetch_add(wire_len as u64, Ordering::Relaxed);
            }
            None => {
                self.counters
                    .compression_cancelled
                    .fetch_add(1, Ordering::Relaxed);
                self.counters
                    .bytes_wire
                    .fetch_add(raw_len as u64, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            chunks_sent: self.counters.chunks_sent.load(Ordering::Relaxed),
            chunks_received: self.counters.chunks_received.load(Ordering::Relaxed),
            chunks_dropped: self.counters.chunks_dropped.load(Ordering::Relaxed),
            chunks_played: self.counters.chunks_played.load(Ordering::Relaxed),
            resyncs: self.counters.resyncs.load(Ordering::Relaxed),
            compressed_sent: self.counters.compressed_sent.load(Ordering::Relaxed),
            compression_cancelled: self.counters.compression_cancelled.load(Ordering::Relaxed),
            bytes_raw: self.counters.bytes_raw.load(Ordering::Relaxed),
            bytes_wire: self.counters.bytes_wire.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Snapshot {
    pub chunks_sent: u64,
    pub chunks_received: u64,
    pub chunks_dropped: u64,
    pub chunks_played: u64,
    pub resyncs: u32,
    pub compressed_sent: u64,
    pub compression_cancelled: u64,
    pub bytes_raw: u64,
    pub bytes_wire: u64,
}

impl Snapshot {
    /// `< 1.0` means the wire form is smaller than the source; `1.0` when
    /// nothing has been sent yet or compression never shrank anything.
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_raw == 0 {
            1.0
        } else {
            self.bytes_wire as f64 / self.bytes_raw as f64
        }
    }

    /// Chunks per second of wall-clock reporting interval — the
    /// throughput line the status output prints.
    pub fn chunks_per_second(&self, previous: &Snapshot, elapsed: Duration) -> f64 {
        let delta = self.chunks_sent.saturating_sub(previous.chunks_sent);
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            delta as f64 / secs
        }
    }
}

/// Spawns a subsystem that logs a summary line every `period`. Exits on
/// shutdown request like every other subsystem in this crate.
pub async fn run_reporter(subsys: SubsystemHandle, stats: Stats, period: Duration) {
    let mut ticker = interval(period);
    let mut previous = stats.snapshot();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let current = stats.snapshot();
                let cps = current.chunks_per_second(&previous, period);
                info!(
                    chunks_sent = current.chunks_sent,
                    chunks_received = current.chunks_received,
                    chunks_dropped = current.chunks_dropped,
                    chunks_played = current.chunks_played,
                    resyncs = current.resyncs,
                    chunks_per_second = cps,
                    compression_ratio = current.compression_ratio(),
                    compression_cancelled = current.compression_cancelled,
                    "status"
                );
                previous = current;
            }
            _ = subsys.on_shutdown_requested() => break,
        }
    }
}
