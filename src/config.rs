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

//! Command-line surface and validated settings. WaveSync has no config
//! file — the CLI *is* the configuration. Kept as a two-stage `Args`
//! (raw clap output) → `Settings` (validated, typed) split, so parsing
//! and validation stay separate concerns.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tracing::warn;

use crate::audio::{AudioConfig, SampleBits};
use crate::error::{WaveSyncError, WaveSyncResult};

pub const DEFAULT_CHANNEL: &str = "224.0.0.57:45300";

#[derive(Parser, Debug)]
#[command(author, version, about = "Phase-aligned multi-room PCM audio distribution over UDP")]
pub struct Args {
    /// Act as the transmitter, reading PCM from the given UNIX-domain socket.
    #[arg(long, group = "mode")]
    pub tx: Option<PathBuf>,

    /// Act as a receiver.
    #[arg(long, group = "mode")]
    pub rx: bool,

    /// Transmitter only: also play the stream locally instead of only
    /// broadcasting it.
    #[arg(long = "local-play")]
    pub local_play: bool,

    /// Destination(s) as `IP:PORT`. Repeatable on the transmitter; exactly
    /// one is accepted on a receiver.
    #[arg(long = "channel", default_values_t = vec![DEFAULT_CHANNEL.to_string()])]
    pub channels: Vec<String>,

    /// Local interface to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Playback latency budget, milliseconds.
    #[arg(long, default_value_t = 1000)]
    pub latency: u32,

    /// Receiver drift tolerance, milliseconds.
    #[arg(long, default_value_t = 15)]
    pub tolerance: u32,

    /// Requested datagram payload size in bytes, before frame rounding.
    #[arg(long = "payload-size", default_value_t = 1472)]
    pub payload_size: usize,

    /// Multicast TTL.
    #[arg(long, default_value_t = 2)]
    pub ttl: u32,

    /// zlib compression level, 1-9. Omit to disable compression.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=9))]
    pub compress: Option<u32>,

    /// Disable multicast loopback.
    #[arg(long)]
    pub no_loop: bool,

    /// Enable SO_BROADCAST.
    #[arg(long)]
    pub broadcast: bool,

    /// Sample rate, Hz.
    #[arg(long, default_value_t = 44_100)]
    pub rate: u32,

    /// Use 24-bit samples instead of the 16-bit default.
    #[arg(long = "24bits")]
    pub bits24: bool,

    /// Channel count, 1 (mono) or 2 (stereo).
    #[arg(long, default_value_t = 2)]
    pub channels_count: u8,

    /// Additional sink-side latency already accounted for by the device.
    #[arg(long = "sink-latency", default_value_t = 0)]
    pub sink_latency: u32,

    /// Sound-card ring buffer size, frames.
    #[arg(long = "buffer-size", default_value_t = 8192)]
    pub buffer_size: u32,

    /// Output device index; -1 selects the no-op test sink.
    #[arg(long = "device-index", default_value_t = 0)]
    pub device_index: i32,

    /// Raise the log filter to debug.
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Transmit,
    Receive,
}

/// Validated, typed settings derived from [`Args`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub mode: Mode,
    pub tx_source: Option<PathBuf>,
    pub local_play: bool,
    pub channels: Vec<SocketAddr>,
    pub bind: IpAddr,
    pub audio: AudioConfig,
    pub tolerance_ms: u32,
    pub payload_size: usize,
    pub ttl: u32,
    pub compress_level: Option<u32>,
    pub multicast_loop: bool,
    pub broadcast: bool,
    pub buffer_size_frames: u32,
    pub device_index: Option<usize>,
    pub debug: bool,
}

impl TryFrom<Args> for Settings {
    type Error = WaveSyncError;

    fn try_from(args: Args) -> WaveSyncResult<Self> {
        let mode = match (&args.tx, args.rx) {
            (Some(_), false) => Mode::Transmit,
            (None, true) => Mode::Receive,
            (None, false) => {
                return Err(WaveSyncError::ArgError(
                    "exactly one of --tx or --rx is required".into(),
                ));
            }
            (Some(_), true) => {
                return Err(WaveSyncError::ArgError(
                    "--tx and --rx are mutually exclusive".into(),
                ));
            }
        };

        if mode == Mode::Receive && args.channels.len() != 1 {
            return Err(WaveSyncError::ArgError(
                "--rx accepts exactly one --channel".into(),
            ));
        }

        let channels = args
            .channels
            .iter()
            .map(|s| parse_channel(s))
            .collect::<WaveSyncResult<Vec<_>>>()?;

        if args.device_index < -1 {
            return Err(WaveSyncError::ArgError(
                "--device-index must be >= -1".into(),
            ));
        }
        let device_index = if args.device_index < 0 {
            None
        } else {
            Some(args.device_index as usize)
        };

        let sample_bits = if args.bits24 {
            SampleBits::Bits24
        } else {
            SampleBits::Bits16
        };

        if args.latency >= 5_000 {
            warn!(latency_ms = args.latency, "using an unusually large latency");
        }

        let audio = AudioConfig::new(
            args.rate,
            sample_bits,
            args.channels_count,
            args.latency,
            args.sink_latency,
            args.payload_size,
        )?;

        Ok(Settings {
            mode,
            tx_source: args.tx,
            local_play: args.local_play,
            channels,
            bind: args.bind,
            audio,
            tolerance_ms: args.tolerance,
            payload_size: args.payload_size,
            ttl: args.ttl,
            compress_level: args.compress,
            multicast_loop: !args.no_loop,
            broadcast: args.broadcast,
            buffer_size_frames: args.buffer_size,
            device_index,
            debug: args.debug,
        })
    }
}

fn parse_channel(s: &str) -> WaveSyncResult<SocketAddr> {
    s.parse()
        .map_err(|_| WaveSyncError::ArgError(format!("invalid channel `{s}`, expected IP:PORT")))
}
