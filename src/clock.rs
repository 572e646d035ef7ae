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

//! The fleet is assumed to share a wall clock (NTP-synchronized) within a
//! few tens of milliseconds. Every component that reads "now" does so
//! through this trait rather than calling `SystemTime::now()` directly,
//! so tests can drive the clock deterministically.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// A source of wall-clock seconds since the Unix epoch.
pub trait WallClock: Clone + Send + Sync + 'static {
    fn now_secs(&self) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_secs(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the Unix epoch")
            .as_secs_f64()
    }
}

/// A settable clock for deterministic tests. Stored as bits of an `f64` in
/// an atomic so the clock can be shared and advanced from outside the
/// component under test without a mutex.
#[derive(Debug, Clone)]
pub struct FakeClock {
    micros: std::sync::Arc<AtomicU64>,
}

impl FakeClock {
    pub fn at(secs: f64) -> Self {
        Self {
            micros: std::sync::Arc::new(AtomicU64::new((secs * 1_000_000.0) as u64)),
        }
    }

    pub fn set(&self, secs: f64) {
        self.micros
            .store((secs * 1_000_000.0) as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        let delta = (secs * 1_000_000.0) as u64;
        self.micros.fetch_add(delta, Ordering::SeqCst);
    }
}

impl WallClock for FakeClock {
    fn now_secs(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}
