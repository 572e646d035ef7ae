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

//! The transmit pacing loop: stamp, optionally compress, send, and
//! interleave a status datagram every 124 audio sends. Runs on its own
//! dedicated OS thread rather than as a tokio task, keeping the
//! realtime send path off the async scheduler — here it's forced by
//! `SampleReader` doing blocking reads from the PCM source.

use std::io::Read;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use std::io::Write as _;
use tracing::warn;

use crate::audio::AudioConfig;
use crate::clock::WallClock;
use crate::error::WaveSyncResult;
use crate::queue::{ChunkQueueProducer, QueueEntry};
use crate::sample_reader::SampleReader;
use crate::stats::Stats;
use crate::timemark::encode;
use crate::wire::{Header, StatusPacket, build_audio_datagram, build_status_datagram};

/// Status is (re-)sent after every 124th audio datagram — about 1s at
/// 44.1kHz/1kB chunks.
const STATUS_EVERY: u32 = 124;

pub struct Packetizer<C: WallClock> {
    clock: C,
    socket: UdpSocket,
    destinations: Vec<SocketAddr>,
    compress_level: Option<u32>,
    local_queue: Option<ChunkQueueProducer>,
    stats: Stats,
    stop: Arc<AtomicBool>,
    chunk_no: u32,
}

impl<C: WallClock> Packetizer<C> {
    pub fn new(
        clock: C,
        socket: UdpSocket,
        destinations: Vec<SocketAddr>,
        compress_level: Option<u32>,
        local_queue: Option<ChunkQueueProducer>,
        stats: Stats,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            clock,
            socket,
            destinations,
            compress_level,
            local_queue,
            stats,
            stop,
            chunk_no: 0,
        }
    }

    /// Drains `reader` until `source` is exhausted or `stop` is set.
    pub fn run(
        &mut self,
        reader: &mut SampleReader<C>,
        source: &mut dyn Read,
        latency_s: f64,
    ) -> WaveSyncResult<()> {
        while !self.stop.load(Ordering::Relaxed) {
            let Some(timed) = reader.read_chunk(source)? else {
                break;
            };

            self.pace(timed.stream_time);

            let (future_ts, mark) = encode(timed.stream_time, latency_s);

            if let Some(queue) = &self.local_queue {
                queue.push_blocking(QueueEntry::Audio {
                    due_at: future_ts,
                    chunk: timed.chunk.clone(),
                });
            }

            let (header, payload) = self.maybe_compress(&timed.chunk);

            self.chunk_no = self.chunk_no.wrapping_add(1);

            let datagram = build_audio_datagram(header, mark, &payload);
            for dest in &self.destinations {
                if let Err(e) = self.socket.send_to(&datagram, dest) {
                    if e.raw_os_error() == Some(libc::EMSGSIZE) {
                        let new_size = reader.decrement_payload_size();
                        warn!(
                            new_chunk_size_bytes = new_size,
                            "EMSGSIZE sending to {dest}; backed off payload size"
                        );
                    } else {
                        warn!("send to {dest} failed: {e}");
                    }
                    break;
                }
            }
            self.stats.chunk_sent();

            if self.chunk_no % STATUS_EVERY == 0 {
                self.send_status(reader.config());
            }
        }

        Ok(())
    }

    /// Skew check: sleep if the reader is running ahead of real time,
    /// warn if it's fallen far behind.
    fn pace(&self, stream_time: f64) {
        let now = self.clock.now_secs();
        let skew = stream_time - now;
        if skew > 0.5 {
            thread::sleep(Duration::from_millis(400));
        } else if skew < -5.0 {
            warn!(skew, "sample reader lagging badly behind wall clock");
        }
    }

    fn maybe_compress(&mut self, chunk: &[u8]) -> (Header, Vec<u8>) {
        let Some(level) = self.compress_level else {
            self.stats.compression_attempt(chunk.len(), None);
            return (Header::RawAudio, chunk.to_vec());
        };

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
        if encoder.write_all(chunk).is_err() {
            self.stats.compression_attempt(chunk.len(), None);
            return (Header::RawAudio, chunk.to_vec());
        }
        match encoder.finish() {
            Ok(compressed) if compressed.len() < chunk.len() => {
                self.stats.compression_attempt(chunk.len(), Some(compressed.len()));
                (Header::CompressedAudio, compressed)
            }
            _ => {
                self.stats.compression_attempt(chunk.len(), None);
                (Header::RawAudio, chunk.to_vec())
            }
        }
    }

    fn send_status(&self, config: &AudioConfig) {
        let status = StatusPacket::from_config(config, self.clock.now_secs(), self.chunk_no);
        let datagram = build_status_datagram(&status);
        for dest in &self.destinations {
            if let Err(e) = self.socket.send_to(&datagram, dest) {
                warn!("status send to {dest} failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::audio::SampleBits;
    use crate::clock::FakeClock;
    use crate::queue::chunk_queue;
    use crate::wire::classify;
    use std::io::Cursor;
    use std::net::UdpSocket as StdUdpSocket;

    fn cfg() -> AudioConfig {
        AudioConfig::new(44_100, SampleBits::Bits16, 2, 1000, 0, 16).unwrap()
    }

    #[test]
    fn sends_one_datagram_per_chunk_and_pushes_local_queue() {
        let clock = FakeClock::at(1000.0);
        let mut reader = SampleReader::new(clock.clone(), cfg());
        let (producer, mut consumer) = chunk_queue(8);

        let tx_socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let rx_socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        rx_socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let rx_addr = rx_socket.local_addr().unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let mut packetizer = Packetizer::new(
            clock,
            tx_socket,
            vec![rx_addr],
            None,
            Some(producer),
            Stats::default(),
            stop,
        );

        let mut src = Cursor::new(vec![1u8; 16]);
        packetizer.run(&mut reader, &mut src, 1.0).unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = rx_socket.recv_from(&mut buf).unwrap();
        match classify(&buf[..n]).unwrap() {
            crate::wire::Datagram::Audio { compressed, payload, .. } => {
                assert!(!compressed);
                assert_eq!(payload.len(), 16);
            }
            other => panic!("unexpected: {other:?}"),
        }

        match consumer.next_blocking() {
            Some(QueueEntry::Audio { chunk, .. }) => assert_eq!(chunk.len(), 16),
            other => panic!("unexpected queue entry: {other:?}"),
        }
    }

    #[test]
    fn status_sent_every_124_chunks() {
        let clock = FakeClock::at(1000.0);
        let mut reader = SampleReader::new(clock.clone(), cfg());
        let tx_socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        let rx_socket = StdUdpSocket::bind("127.0.0.1:0").unwrap();
        rx_socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        let rx_addr = rx_socket.local_addr().unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let mut packetizer = Packetizer::new(
            clock,
            tx_socket,
            vec![rx_addr],
            None,
            None,
            Stats::default(),
            stop,
        );

        let mut src = Cursor::new(vec![1u8; 16 * 124]);
        packetizer.run(&mut reader, &mut src, 1.0).unwrap();

        let mut statuses = 0;
        let mut audio = 0;
        let mut buf = [0u8; 2048];
        while let Ok((n, _)) = rx_socket.recv_from(&mut buf) {
            match classify(&buf[..n]).unwrap() {
                crate::wire::Datagram::Status(_) => statuses += 1,
                crate::wire::Datagram::Audio { .. } => audio += 1,
            }
        }
        assert_eq!(audio, 124);
        assert_eq!(statuses, 1);
    }
}
