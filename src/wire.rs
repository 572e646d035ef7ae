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

//! Datagram framing. Every datagram starts with a 2-byte big-endian
//! header; the status payload is a flat little-endian struct. Kept as
//! a standalone module (rather than folded into
//! `packetizer.rs`/`receiver.rs`) because both sides need the exact
//! same byte layout and this is the one place that must not drift.

use crate::audio::{AudioConfig, SampleBits};
use crate::error::{WireError, WaveSyncResult};
use crate::timemark::TimeMark;

pub const HEADER_LEN: usize = 2;
pub const MARK_LEN: usize = 2;
pub const STATUS_LEN: usize = 8 + 4 + 2 + 1 + 1 + 2 + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Header {
    RawAudio,
    CompressedAudio,
    Status,
}

impl Header {
    const RAW_AUDIO: u16 = 0x0000;
    const COMPRESSED_AUDIO: u16 = 0x8000;
    const STATUS: u16 = 0x4000;

    pub fn to_be_bytes(self) -> [u8; 2] {
        match self {
            Header::RawAudio => Self::RAW_AUDIO,
            Header::CompressedAudio => Self::COMPRESSED_AUDIO,
            Header::Status => Self::STATUS,
        }
        .to_be_bytes()
    }

    pub fn parse(bytes: [u8; 2]) -> WaveSyncResult<Self> {
        match u16::from_be_bytes(bytes) {
            Self::RAW_AUDIO => Ok(Header::RawAudio),
            Self::COMPRESSED_AUDIO => Ok(Header::CompressedAudio),
            Self::STATUS => Ok(Header::Status),
            _ => Err(WireError::UnknownHeader.into()),
        }
    }
}

/// The on-wire status record: enough of `AudioConfig` plus a sender
/// timestamp and running chunk counter for the receiver to estimate
/// clock skew and detect loss.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusPacket {
    pub sender_wall_ts: f64,
    pub chunk_no: u32,
    pub rate: u16,
    pub sample_bits: u8,
    pub channels: u8,
    pub chunk_size: u16,
    pub latency_ms: u16,
}

impl StatusPacket {
    pub fn from_config(cfg: &AudioConfig, sender_wall_ts: f64, chunk_no: u32) -> Self {
        Self {
            sender_wall_ts,
            chunk_no,
            rate: cfg.rate as u16,
            sample_bits: cfg.sample_bits.as_u8(),
            channels: cfg.channels,
            chunk_size: cfg.chunk_size_bytes() as u16,
            latency_ms: cfg.latency_ms as u16,
        }
    }

    pub fn encode(&self) -> [u8; STATUS_LEN] {
        let mut out = [0u8; STATUS_LEN];
        out[0..8].copy_from_slice(&self.sender_wall_ts.to_le_bytes());
        out[8..12].copy_from_slice(&self.chunk_no.to_le_bytes());
        out[12..14].copy_from_slice(&self.rate.to_le_bytes());
        out[14] = self.sample_bits;
        out[15] = self.channels;
        out[16..18].copy_from_slice(&self.chunk_size.to_le_bytes());
        out[18..20].copy_from_slice(&self.latency_ms.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> WaveSyncResult<Self> {
        if bytes.len() < STATUS_LEN {
            return Err(WireError::StatusTruncated.into());
        }
        Ok(Self {
            sender_wall_ts: f64::from_le_bytes(bytes[0..8].try_into().expect("len checked")),
            chunk_no: u32::from_le_bytes(bytes[8..12].try_into().expect("len checked")),
            rate: u16::from_le_bytes(bytes[12..14].try_into().expect("len checked")),
            sample_bits: bytes[14],
            channels: bytes[15],
            chunk_size: u16::from_le_bytes(bytes[16..18].try_into().expect("len checked")),
            latency_ms: u16::from_le_bytes(bytes[18..20].try_into().expect("len checked")),
        })
    }

    pub fn audio_config(&self) -> WaveSyncResult<AudioConfig> {
        let sample_bits = SampleBits::from_u8(self.sample_bits)?;
        AudioConfig::new(
            self.rate as u32,
            sample_bits,
            self.channels,
            self.latency_ms as u32,
            0,
            self.chunk_size as usize,
        )
    }
}

/// What an inbound datagram turned out to be, after the 2-byte header and
/// (for audio) the time mark have been stripped off.
#[derive(Debug, Clone)]
pub enum Datagram {
    Audio {
        mark: TimeMark,
        compressed: bool,
        payload: Vec<u8>,
    },
    Status(StatusPacket),
}

pub fn classify(bytes: &[u8]) -> WaveSyncResult<Datagram> {
    if bytes.len() < HEADER_LEN {
        return Err(WireError::TooShort.into());
    }
    let header = Header::parse([bytes[0], bytes[1]])?;
    let rest = &bytes[HEADER_LEN..];
    match header {
        Header::Status => Ok(Datagram::Status(StatusPacket::decode(rest)?)),
        Header::RawAudio | Header::CompressedAudio => {
            if rest.len() < MARK_LEN {
                return Err(WireError::TooShort.into());
            }
            let mark = TimeMark::from_be_bytes([rest[0], rest[1]]);
            Ok(Datagram::Audio {
                mark,
                compressed: header == Header::CompressedAudio,
                payload: rest[MARK_LEN..].to_vec(),
            })
        }
    }
}

pub fn build_audio_datagram(header: Header, mark: TimeMark, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + MARK_LEN + payload.len());
    out.extend_from_slice(&header.to_be_bytes());
    out.extend_from_slice(&mark.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn build_status_datagram(status: &StatusPacket) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + STATUS_LEN);
    out.extend_from_slice(&Header::Status.to_be_bytes());
    out.extend_from_slice(&status.encode());
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn raw_audio_round_trips() {
        let mark = TimeMark(1234);
        let datagram = build_audio_datagram(Header::RawAudio, mark, &[1, 2, 3, 4]);
        match classify(&datagram).unwrap() {
            Datagram::Audio {
                mark: m,
                compressed,
                payload,
            } => {
                assert_eq!(m, mark);
                assert!(!compressed);
                assert_eq!(payload, vec![1, 2, 3, 4]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn compressed_audio_sets_flag() {
        let datagram = build_audio_datagram(Header::CompressedAudio, TimeMark(0), &[9]);
        match classify(&datagram).unwrap() {
            Datagram::Audio { compressed, .. } => assert!(compressed),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn status_round_trips() {
        let cfg = AudioConfig::new(44_100, SampleBits::Bits16, 2, 1000, 0, 1000).unwrap();
        let status = StatusPacket::from_config(&cfg, 1_700_000_000.5, 42);
        let datagram = build_status_datagram(&status);
        match classify(&datagram).unwrap() {
            Datagram::Status(decoded) => assert_eq!(decoded, status),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_header_is_rejected() {
        let bytes = [0x12, 0x34, 0, 0];
        assert!(classify(&bytes).is_err());
    }

    #[test]
    fn truncated_datagram_is_rejected() {
        assert!(classify(&[0x00]).is_err());
        assert!(classify(&[0x00, 0x00]).is_err());
        assert!(classify(&[0x40, 0x00, 0, 0]).is_err());
    }
}
