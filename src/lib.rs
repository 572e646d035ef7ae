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

//! WaveSync: phase-aligned, multi-room PCM audio distribution over UDP.
//!
//! A transmitter reads raw PCM from a UNIX-domain socket, stamps each
//! chunk with a future playback instant, and fans it out to one or more
//! unicast/multicast/broadcast destinations. Each receiver reconstructs
//! the playback instant from the wire-compact time mark and schedules
//! its sound card write so every receiver in the fleet emits the same
//! sample at the same moment.

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod packetizer;
pub mod player;
pub mod queue;
pub mod receiver;
pub mod sample_reader;
pub mod sink;
pub mod socket;
pub mod stats;
pub mod timemark;
pub mod utils;
pub mod wire;

pub use error::{WaveSyncError, WaveSyncResult};
