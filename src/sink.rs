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

//! Audio output backends. `AudioSink` is the seam the player schedules
//! against; a real device is driven through `cpal` with a bounded ring
//! buffer feeding the realtime callback, so writes from the player
//! thread never block the callback.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::audio::AudioConfig;
use crate::error::{WaveSyncError, WaveSyncResult};

/// Something the player can hand PCM frames to. `open`/`close` bracket a
/// device lifetime; a reconfiguration closes the old sink and opens a
/// new one at the new `AudioConfig`.
pub trait AudioSink: Send {
    fn open(&mut self, config: &AudioConfig) -> WaveSyncResult<()>;
    fn close(&mut self);
    /// How many frames can currently be written without blocking.
    fn write_available_frames(&self) -> usize;
    fn write(&mut self, frames: &[u8]) -> WaveSyncResult<()>;
}

/// Backs onto nothing — every write succeeds and the device always
/// reports its full buffer as available. Used for `--device-index -1`
/// and by integration tests that only care about queue/player logic,
/// not real audio hardware.
pub struct NullSink {
    capacity_frames: usize,
    open: bool,
}

impl NullSink {
    pub fn new(capacity_frames: usize) -> Self {
        Self {
            capacity_frames,
            open: false,
        }
    }
}

impl AudioSink for NullSink {
    fn open(&mut self, _config: &AudioConfig) -> WaveSyncResult<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn write_available_frames(&self) -> usize {
        if self.open {
            self.capacity_frames
        } else {
            0
        }
    }

    fn write(&mut self, _frames: &[u8]) -> WaveSyncResult<()> {
        if !self.open {
            return Err(WaveSyncError::Sink("sink not open".into()));
        }
        Ok(())
    }
}

/// Records every write instead of discarding it. Used by unit/integration
/// tests that assert on what reached the "speaker".
#[derive(Default)]
pub struct TestSink {
    open: bool,
    capacity_frames: usize,
    frame_size: usize,
    pub writes: Vec<Vec<u8>>,
}

impl TestSink {
    pub fn new(capacity_frames: usize) -> Self {
        Self {
            capacity_frames,
            ..Default::default()
        }
    }
}

impl AudioSink for TestSink {
    fn open(&mut self, config: &AudioConfig) -> WaveSyncResult<()> {
        self.frame_size = config.frame_size();
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn write_available_frames(&self) -> usize {
        if self.open {
            self.capacity_frames
        } else {
            0
        }
    }

    fn write(&mut self, frames: &[u8]) -> WaveSyncResult<()> {
        if !self.open {
            return Err(WaveSyncError::Sink("sink not open".into()));
        }
        self.writes.push(frames.to_vec());
        Ok(())
    }
}

/// Picks a concrete sink for the CLI's `--device-index`: `None` (CLI
/// value `-1`) is the documented "test mode" bypass, anything else is a
/// real output device when the `cpal` feature is compiled in.
pub fn open_configured_sink(
    device_index: Option<usize>,
    buffer_size_frames: usize,
) -> Box<dyn AudioSink> {
    match device_index {
        None => Box::new(NullSink::new(buffer_size_frames)),
        #[cfg(feature = "cpal")]
        Some(idx) => Box::new(CpalSink::new(Some(idx), buffer_size_frames)),
        #[cfg(not(feature = "cpal"))]
        Some(_) => {
            tracing::warn!("built without the `cpal` feature; falling back to the null sink");
            Box::new(NullSink::new(buffer_size_frames))
        }
    }
}

impl AudioSink for Box<dyn AudioSink> {
    fn open(&mut self, config: &AudioConfig) -> WaveSyncResult<()> {
        (**self).open(config)
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn write_available_frames(&self) -> usize {
        (**self).write_available_frames()
    }

    fn write(&mut self, frames: &[u8]) -> WaveSyncResult<()> {
        (**self).write(frames)
    }
}

#[cfg(feature = "cpal")]
pub use cpal_backend::CpalSink;

#[cfg(feature = "cpal")]
mod cpal_backend {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat as CpalSampleFormat, Stream, StreamConfig};
    use tracing::{error, warn};

    /// Shared byte ring buffer between the player thread (producer) and
    /// the cpal realtime callback (consumer). Never blocks the callback:
    /// an empty buffer yields silence.
    struct RingBuffer {
        data: VecDeque<u8>,
        capacity_bytes: usize,
    }

    pub struct CpalSink {
        device_index: Option<usize>,
        ring: Option<Arc<Mutex<RingBuffer>>>,
        stream: Option<Stream>,
        frame_size: usize,
        capacity_frames: usize,
    }

    impl CpalSink {
        pub fn new(device_index: Option<usize>, capacity_frames: usize) -> Self {
            Self {
                device_index,
                ring: None,
                stream: None,
                frame_size: 0,
                capacity_frames,
            }
        }

        fn select_device(&self) -> WaveSyncResult<cpal::Device> {
            let host = cpal::default_host();
            match self.device_index {
                None => host
                    .default_output_device()
                    .ok_or_else(|| WaveSyncError::Sink("no default output device".into())),
                Some(idx) => {
                    let mut devices = host
                        .output_devices()
                        .map_err(|e| WaveSyncError::Sink(e.to_string()))?;
                    devices
                        .nth(idx)
                        .ok_or_else(|| WaveSyncError::Sink(format!("no output device #{idx}")))
                }
            }
        }
    }

    impl AudioSink for CpalSink {
        fn open(&mut self, config: &AudioConfig) -> WaveSyncResult<()> {
            let device = self.select_device()?;
            let stream_config = StreamConfig {
                channels: config.channels as u16,
                sample_rate: cpal::SampleRate(config.rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let frame_size = config.frame_size();
            let sample_bytes = config.sample_bits.bytes();
            let capacity_bytes = self.capacity_frames * frame_size;
            let ring = Arc::new(Mutex::new(RingBuffer {
                data: VecDeque::with_capacity(capacity_bytes),
                capacity_bytes,
            }));
            let ring_cb = Arc::clone(&ring);

            let stream = device
                .build_output_stream(
                    &stream_config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut ring = match ring_cb.lock() {
                            Ok(r) => r,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        for sample_out in data.iter_mut() {
                            *sample_out = if ring.data.len() >= sample_bytes {
                                let bytes: Vec<u8> =
                                    (0..sample_bytes).filter_map(|_| ring.data.pop_front()).collect();
                                decode_sample(&bytes)
                            } else {
                                0.0
                            };
                        }
                    },
                    |err| error!("audio stream error: {err}"),
                    None,
                )
                .map_err(|e| WaveSyncError::Sink(e.to_string()))?;

            if cpal_sample_format_mismatch(&device, &stream_config) {
                warn!("device's native sample format differs from cpal's f32 stream path");
            }

            stream.play().map_err(|e| WaveSyncError::Sink(e.to_string()))?;

            self.frame_size = frame_size;
            self.ring = Some(ring);
            self.stream = Some(stream);
            Ok(())
        }

        fn close(&mut self) {
            self.stream = None;
            self.ring = None;
        }

        fn write_available_frames(&self) -> usize {
            let Some(ring) = &self.ring else { return 0 };
            let ring = match ring.lock() {
                Ok(r) => r,
                Err(poisoned) => poisoned.into_inner(),
            };
            let free_bytes = ring.capacity_bytes.saturating_sub(ring.data.len());
            if self.frame_size == 0 {
                0
            } else {
                free_bytes / self.frame_size
            }
        }

        fn write(&mut self, frames: &[u8]) -> WaveSyncResult<()> {
            let Some(ring) = &self.ring else {
                return Err(WaveSyncError::Sink("sink not open".into()));
            };
            let mut ring = match ring.lock() {
                Ok(r) => r,
                Err(poisoned) => poisoned.into_inner(),
            };
            ring.data.extend(frames.iter().copied());
            Ok(())
        }
    }

    fn decode_sample(bytes: &[u8]) -> f32 {
        match bytes.len() {
            2 => {
                let v = i16::from_le_bytes([bytes[0], bytes[1]]);
                v as f32 / i16::MAX as f32
            }
            3 => {
                let mut v =
                    (bytes[2] as i32) << 16 | (bytes[1] as i32) << 8 | bytes[0] as i32;
                if v & 0x800000 != 0 {
                    v |= !0xFFFFFF;
                }
                v as f32 / 0x7FFFFF as f32
            }
            _ => 0.0,
        }
    }

    fn cpal_sample_format_mismatch(device: &cpal::Device, _config: &StreamConfig) -> bool {
        device
            .default_output_config()
            .map(|c| c.sample_format() != CpalSampleFormat::F32)
            .unwrap_or(false)
    }
}
