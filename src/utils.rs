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

//! Small shared helpers used by the packetizer and player threads. Kept
//! separate from those modules because both want "rolling average over the
//! last N samples" and "this thread is latency-sensitive, ask the OS for a
//! realtime schedule".

use std::{fmt::Debug, iter::Sum, ops::{Add, Div}};
use thread_priority::{
    RealtimeThreadSchedulePolicy, ThreadPriority, ThreadSchedulePolicy,
    set_thread_priority_and_policy, thread_native_id,
};
use tracing::{info, warn};

pub trait GetAverage<T> {
    fn average(&self) -> T;
}

impl<N, S> GetAverage<N> for S
where
    N: Copy + TryFrom<usize, Error: Debug> + Add + Div<Output = N> + Sum<N>,
    S: AsRef<[N]>,
{
    fn average(&self) -> N {
        let slice = self.as_ref();
        slice.iter().map(ToOwned::to_owned).sum::<N>()
            / N::try_from(slice.len()).expect("cannot cast slice length to value type")
    }
}

/// A fixed-size ring that yields an average every time it wraps around.
/// Used for the packetizer's skew smoothing and the player's drift
/// smoothing — both want "average of the last N samples", recomputed
/// every N samples rather than continuously.
pub struct AverageCalculationBuffer<N> {
    buffer: Box<[N]>,
    cursor: usize,
}

impl<N> AverageCalculationBuffer<N>
where
    Box<[N]>: GetAverage<N>,
    N: Default + Clone,
{
    pub fn new(len: usize) -> Self {
        Self {
            buffer: vec![N::default(); len].into_boxed_slice(),
            cursor: 0,
        }
    }

    pub fn update(&mut self, value: N) -> Option<N> {
        self.buffer[self.cursor] = value;
        self.cursor += 1;
        if self.cursor >= self.buffer.len() {
            self.cursor = 0;
            let average = self.buffer.average();
            Some(average)
        } else {
            None
        }
    }
}

/// Bumps the calling thread to realtime FIFO scheduling. Used by the
/// packetizer's pacing thread and the player's scheduling thread — both
/// have suspension points timed to the millisecond and benefit from not
/// being preempted by the rest of the system. Best-effort: most
/// environments (containers, non-root users) deny this, which is only a
/// scheduling-fairness loss, not a correctness one.
pub fn set_realtime_priority() {
    let pid = thread_native_id();
    if let Err(e) = set_thread_priority_and_policy(
        pid,
        ThreadPriority::Max,
        ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
    ) {
        warn!("could not set realtime thread priority: {e}");
    } else {
        info!("set realtime priority for thread {pid}");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn average_buffer_emits_on_wraparound() {
        let mut buf: AverageCalculationBuffer<f64> = AverageCalculationBuffer::new(3);
        assert_eq!(buf.update(1.0), None);
        assert_eq!(buf.update(2.0), None);
        assert_eq!(buf.update(3.0), Some(2.0));
        assert_eq!(buf.update(10.0), None);
    }
}
