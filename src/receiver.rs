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

//! Datagram demultiplexing: classify each inbound datagram, decode
//! status into loss/config bookkeeping, decode audio into queued,
//! timestamped chunks. Runs as its own tokio task rather than a
//! dedicated OS thread — unlike the packetizer it has no blocking PCM
//! source to contend with, so the async socket is enough.

use std::net::SocketAddr;

use flate2::read::ZlibDecoder;
use std::io::Read as _;
use tokio::net::UdpSocket;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{info, warn};

use crate::audio::AudioConfig;
use crate::clock::WallClock;
use crate::error::{WireError, WaveSyncResult};
use crate::queue::{ChunkQueueProducer, QueueEntry};
use crate::stats::Stats;
use crate::timemark::decode;
use crate::wire::{Datagram, StatusPacket, classify};

/// Below this the sender's own counter restarting looks the same as a
/// process restart.
const SENDER_RESTART_THRESHOLD: u32 = 1500;

pub struct Receiver<C: WallClock> {
    clock: C,
    socket: UdpSocket,
    queue: ChunkQueueProducer,
    stats: Stats,
    current_config: Option<AudioConfig>,
}

impl<C: WallClock> Receiver<C> {
    pub fn new(clock: C, socket: UdpSocket, queue: ChunkQueueProducer, stats: Stats) -> Self {
        Self {
            clock,
            socket,
            queue,
            stats,
            current_config: None,
        }
    }

    pub async fn run(mut self, subsys: SubsystemHandle) -> WaveSyncResult<()> {
        let mut buf = [0u8; 65_535];
        loop {
            tokio::select! {
                recvd = self.socket.recv_from(&mut buf) => {
                    match recvd {
                        Ok((n, from)) => self.datagram_received(&buf[..n], from).await,
                        Err(e) => {
                            warn!("receive error: {e}");
                        }
                    }
                }
                _ = subsys.on_shutdown_requested() => break,
            }
        }
        Ok(())
    }

    async fn datagram_received(&mut self, bytes: &[u8], from: SocketAddr) {
        let datagram = match classify(bytes) {
            Ok(d) => d,
            Err(e) => {
                warn!("dropping malformed datagram from {from}: {e}");
                return;
            }
        };

        match datagram {
            Datagram::Status(status) => self.status_received(status).await,
            Datagram::Audio {
                mark,
                compressed,
                payload,
            } => self.audio_received(mark, compressed, payload).await,
        }
    }

    async fn status_received(&mut self, status: StatusPacket) {
        let now = self.clock.now_secs();
        let network_latency = now - status.sender_wall_ts;
        tracing::debug!(network_latency, "status received");

        match status.audio_config() {
            Ok(candidate) => {
                if self.current_config != Some(candidate) {
                    self.current_config = Some(candidate);
                    self.queue.push(QueueEntry::Config(candidate)).await;
                }
            }
            Err(e) => warn!("status packet carries an invalid audio config: {e}"),
        }

        let handle = self.queue.handle();
        let sender_chunk_no = status.chunk_no;

        if handle.last_sender_chunk_no().is_none() || sender_chunk_no < SENDER_RESTART_THRESHOLD {
            handle.set_last_sender_chunk_no(sender_chunk_no);
            handle.reset_local_chunk_no();
            return;
        }

        let last = handle.last_sender_chunk_no().expect("checked above");
        let chunks_sent = sender_chunk_no.wrapping_sub(last);
        let local = handle.local_chunk_no();
        let dropped = chunks_sent as i64 - local as i64;

        if dropped > 0 {
            self.stats.chunks_dropped(dropped as u32);
            self.queue.push(QueueEntry::Drops(dropped as u32)).await;
        } else if dropped < 0 {
            warn!(dropped, "receiver observed more chunks than sender reported; possible duplicate stream");
        }

        handle.set_last_sender_chunk_no(sender_chunk_no);
        handle.reset_local_chunk_no();
    }

    async fn audio_received(&mut self, mark: crate::timemark::TimeMark, compressed: bool, payload: Vec<u8>) {
        let handle = self.queue.handle();
        if handle.take_ignored_packet() {
            return;
        }

        let chunk = if compressed {
            match inflate(&payload) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("failed to inflate compressed chunk: {e}");
                    return;
                }
            }
        } else {
            payload
        };

        let now = self.clock.now_secs();
        let future_ts = decode(mark, now);

        handle.next_local_chunk_no();
        self.stats.chunk_received();
        self.queue
            .push(QueueEntry::Audio {
                due_at: future_ts,
                chunk,
            })
            .await;
    }
}

fn inflate(payload: &[u8]) -> WaveSyncResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(payload);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|_| WireError::Decompress)?;
    Ok(out)
}
