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

//! Audio configuration and the derived sizes everything else keys off
//! of. Split between a plain value type and the arithmetic hung off it.

use crate::error::{WaveSyncError, WaveSyncResult};

pub type MilliSeconds = u32;

/// Sample bit depth. Only the two widths the wire protocol supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleBits {
    Bits16,
    Bits24,
}

impl SampleBits {
    pub fn bytes(self) -> usize {
        match self {
            SampleBits::Bits16 => 2,
            SampleBits::Bits24 => 3,
        }
    }

    pub fn from_u8(v: u8) -> WaveSyncResult<Self> {
        match v {
            16 => Ok(SampleBits::Bits16),
            24 => Ok(SampleBits::Bits24),
            other => Err(WaveSyncError::Other(format!(
                "unsupported sample depth: {other}"
            ))),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SampleBits::Bits16 => 16,
            SampleBits::Bits24 => 24,
        }
    }
}

/// The audio format negotiated between transmitter and receivers. Two
/// configurations compare equal iff every field matches; inequality is
/// what drives receiver-side output reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioConfig {
    pub rate: u32,
    pub sample_bits: SampleBits,
    pub channels: u8,
    pub latency_ms: u32,
    pub sink_latency_ms: u32,
    chunk_size_bytes: usize,
}

impl AudioConfig {
    /// Build a config and round `requested_chunk_size` down to a multiple
    /// of the frame size.
    pub fn new(
        rate: u32,
        sample_bits: SampleBits,
        channels: u8,
        latency_ms: u32,
        sink_latency_ms: u32,
        requested_chunk_size_bytes: usize,
    ) -> WaveSyncResult<Self> {
        if channels != 1 && channels != 2 {
            return Err(WaveSyncError::Other(format!(
                "channels must be 1 or 2, got {channels}"
            )));
        }
        if sink_latency_ms > latency_ms {
            return Err(WaveSyncError::ArgError(
                "sink_latency_ms cannot exceed latency_ms".into(),
            ));
        }
        if !(50..29_000).contains(&latency_ms) {
            return Err(WaveSyncError::ArgError(
                "latency_ms must be in [50, 29000)".into(),
            ));
        }

        let mut cfg = Self {
            rate,
            sample_bits,
            channels,
            latency_ms,
            sink_latency_ms,
            chunk_size_bytes: 0,
        };
        cfg.set_chunk_size_bytes(requested_chunk_size_bytes);
        Ok(cfg)
    }

    pub fn frame_size(&self) -> usize {
        self.channels as usize * self.sample_bits.bytes()
    }

    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size_bytes
    }

    /// Re-round `size` down to a multiple of the frame size and adopt it.
    /// Used both at construction and by the MTU back-off path
    /// (`SampleReader::decrement_payload_size`).
    pub fn set_chunk_size_bytes(&mut self, size: usize) {
        let frame = self.frame_size();
        self.chunk_size_bytes = size - (size % frame);
    }

    /// Wall-clock duration, in seconds, covered by one chunk.
    pub fn chunk_time_secs(&self) -> f64 {
        let frames = self.chunk_size_bytes / self.frame_size();
        frames as f64 / self.rate as f64
    }

    pub fn latency_secs(&self) -> f64 {
        self.latency_ms as f64 / 1000.0
    }

    pub fn sink_latency_secs(&self) -> f64 {
        self.sink_latency_ms as f64 / 1000.0
    }
}

/// A fixed-size (or short, stream-final) PCM payload — always an
/// integral number of frames.
pub type Chunk = Vec<u8>;

pub fn is_whole_frames(chunk: &[u8], frame_size: usize) -> bool {
    frame_size != 0 && chunk.len() % frame_size == 0
}
