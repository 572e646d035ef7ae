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

//! The chunk queue: the hand-off point between the network-facing
//! receiver task and the playback task. Modeled as an mpsc channel of
//! tagged entries plus a small shared counter block the receiver and
//! player both touch without contending on the channel itself.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use tokio::sync::mpsc;

use crate::audio::{AudioConfig, Chunk};

/// One slot on the wire between `Receiver` and `ChunkPlayer`.
#[derive(Debug, Clone)]
pub enum QueueEntry {
    /// A chunk due for playback at the given absolute wall-clock instant
    /// (already resolved from its `TimeMark` by the receiver).
    Audio { due_at: f64, chunk: Chunk },
    /// The sender's packet counter skipped ahead by `count`. `count <=
    /// 200` is a documented no-op for the player; anything beyond that
    /// triggers a resync.
    Drops(u32),
    /// A new `AudioConfig` takes effect as of this entry.
    Config(AudioConfig),
}

/// Shared bookkeeping the receiver updates and the player (and stats
/// reporter) reads. Kept out of the channel so a slow player never blocks
/// the receiver from updating loss/ignore state.
#[derive(Debug, Default)]
struct QueueCounters {
    /// Sequence number of the last chunk accepted from the sender, used by
    /// the receiver to detect drops and cleared back to `None` whenever
    /// the player performs a recovery resync.
    last_sender_chunk_no: AtomicU32,
    has_last_sender_chunk_no: AtomicBool,
    /// Chunks the receiver has decided to swallow silently because the
    /// player is still draining a previous resync.
    ignore_audio_packets: AtomicU32,
    /// Chunks handed to the player since startup, irrespective of source.
    local_chunk_no: AtomicU32,
}

#[derive(Debug, Clone)]
pub struct QueueHandle {
    counters: Arc<QueueCounters>,
}

impl QueueHandle {
    pub fn last_sender_chunk_no(&self) -> Option<u32> {
        if self.counters.has_last_sender_chunk_no.load(Ordering::Acquire) {
            Some(self.counters.last_sender_chunk_no.load(Ordering::Acquire))
        } else {
            None
        }
    }

    pub fn set_last_sender_chunk_no(&self, no: u32) {
        self.counters.last_sender_chunk_no.store(no, Ordering::Release);
        self.counters.has_last_sender_chunk_no.store(true, Ordering::Release);
    }

    /// A recovery resync forgets the sender sequence baseline entirely,
    /// rather than leaving a stale one that would make the next
    /// datagram look like another drop.
    pub fn clear_last_sender_chunk_no(&self) {
        self.counters.has_last_sender_chunk_no.store(false, Ordering::Release);
    }

    pub fn ignore_audio_packets(&self) -> u32 {
        self.counters.ignore_audio_packets.load(Ordering::Acquire)
    }

    pub fn set_ignore_audio_packets(&self, n: u32) {
        self.counters.ignore_audio_packets.store(n, Ordering::Release);
    }

    /// Consume one unit of suppression, if any is outstanding. Returns
    /// `true` if the caller should drop the packet it's currently handling.
    pub fn take_ignored_packet(&self) -> bool {
        loop {
            let current = self.counters.ignore_audio_packets.load(Ordering::Acquire);
            if current == 0 {
                return false;
            }
            if self
                .counters
                .ignore_audio_packets
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub fn local_chunk_no(&self) -> u32 {
        self.counters.local_chunk_no.load(Ordering::Acquire)
    }

    pub fn next_local_chunk_no(&self) -> u32 {
        self.counters.local_chunk_no.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Zeroed after every status packet is processed: `local_chunk_no`
    /// counts audio arrivals *since the last status*, not since startup.
    pub fn reset_local_chunk_no(&self) {
        self.counters.local_chunk_no.store(0, Ordering::Release);
    }
}

pub struct ChunkQueueProducer {
    tx: mpsc::Sender<QueueEntry>,
    handle: QueueHandle,
}

impl ChunkQueueProducer {
    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub async fn push(&self, entry: QueueEntry) -> bool {
        self.tx.send(entry).await.is_ok()
    }

    /// For producers running on a dedicated blocking OS thread rather
    /// than inside an async task (the packetizer's pacing loop).
    pub fn push_blocking(&self, entry: QueueEntry) -> bool {
        self.tx.blocking_send(entry).is_ok()
    }
}

pub struct ChunkQueueConsumer {
    rx: mpsc::Receiver<QueueEntry>,
    handle: QueueHandle,
}

impl ChunkQueueConsumer {
    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    pub async fn next(&mut self) -> Option<QueueEntry> {
        self.rx.recv().await
    }

    /// For consumers on a dedicated blocking OS thread, mirroring
    /// [`ChunkQueueProducer::push_blocking`].
    pub fn next_blocking(&mut self) -> Option<QueueEntry> {
        self.rx.blocking_recv()
    }

    /// Non-blocking poll, mainly useful in tests that want to assert
    /// "nothing was enqueued" without a timeout.
    pub fn try_next(&mut self) -> Option<QueueEntry> {
        self.rx.try_recv().ok()
    }
}

/// Bounded so a stalled player applies backpressure to the receiver
/// rather than letting memory grow unbounded during a long stall.
pub fn chunk_queue(depth: usize) -> (ChunkQueueProducer, ChunkQueueConsumer) {
    let (tx, rx) = mpsc::channel(depth);
    let counters = Arc::new(QueueCounters::default());
    let handle = QueueHandle { counters };
    (
        ChunkQueueProducer {
            tx,
            handle: handle.clone(),
        },
        ChunkQueueConsumer { rx, handle },
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::SampleBits;

    #[tokio::test]
    async fn entries_flow_producer_to_consumer() {
        let (producer, mut consumer) = chunk_queue(4);
        assert!(
            producer
                .push(QueueEntry::Audio {
                    due_at: 1.0,
                    chunk: vec![0u8; 4]
                })
                .await
        );
        assert!(producer.push(QueueEntry::Drops(3)).await);
        let cfg = AudioConfig::new(44_100, SampleBits::Bits16, 2, 1000, 0, 1000).unwrap();
        assert!(producer.push(QueueEntry::Config(cfg)).await);

        match consumer.next().await.unwrap() {
            QueueEntry::Audio { due_at, chunk } => {
                assert_eq!(due_at, 1.0);
                assert_eq!(chunk.len(), 4);
            }
            other => panic!("unexpected entry: {other:?}"),
        }
        assert!(matches!(consumer.next().await, Some(QueueEntry::Drops(3))));
        assert!(matches!(consumer.next().await, Some(QueueEntry::Config(_))));
    }

    #[test]
    fn last_sender_chunk_no_tracks_presence_separately_from_value() {
        let (producer, _consumer) = chunk_queue(1);
        let handle = producer.handle();
        assert_eq!(handle.last_sender_chunk_no(), None);
        handle.set_last_sender_chunk_no(0);
        assert_eq!(handle.last_sender_chunk_no(), Some(0));
        handle.clear_last_sender_chunk_no();
        assert_eq!(handle.last_sender_chunk_no(), None);
    }

    #[test]
    fn ignore_audio_packets_counts_down() {
        let (producer, _consumer) = chunk_queue(1);
        let handle = producer.handle();
        handle.set_ignore_audio_packets(2);
        assert!(handle.take_ignored_packet());
        assert!(handle.take_ignored_packet());
        assert!(!handle.take_ignored_packet());
    }

    #[test]
    fn local_chunk_no_increments() {
        let (producer, _consumer) = chunk_queue(1);
        let handle = producer.handle();
        assert_eq!(handle.next_local_chunk_no(), 1);
        assert_eq!(handle.next_local_chunk_no(), 2);
        assert_eq!(handle.local_chunk_no(), 2);
    }
}
