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

//! The time-mark protocol: a compact 16-bit future-time encoding and its
//! lossless recovery at the receiver.
//!
//! A `TimeMark` packs `(future_ts mod 60) * 1000` milliseconds into a
//! big-endian `u16`. It is only unambiguous for horizons under 30s, which
//! is why `Settings` rejects `--latency >= 29000`.

const WHEEL_SECS: f64 = 60.0;

/// A 16-bit wire-format time mark: milliseconds within a 60-second wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeMark(pub u16);

impl TimeMark {
    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 2]) -> Self {
        Self(u16::from_be_bytes(bytes))
    }
}

/// Encode `relative_ts + latency_s` (an absolute, future wall-clock instant)
/// into a [`TimeMark`]. Returns the exact future instant alongside the mark
/// so the caller (the packetizer, for its own local playback queue) doesn't
/// have to re-derive it through the lossy wire format.
pub fn encode(relative_ts: f64, latency_s: f64) -> (f64, TimeMark) {
    let future_ts = relative_ts + latency_s;
    let stamp = (future_ts.rem_euclid(WHEEL_SECS) * 1000.0).round() as u32;
    // stamp is in [0, 60000); fits a u16 with margin to spare.
    (future_ts, TimeMark(stamp as u16))
}

/// Recover an absolute future timestamp from a [`TimeMark`], given the
/// receiver's own (approximately synchronized) wall-clock reading `local_now`.
pub fn decode(mark: TimeMark, local_now: f64) -> f64 {
    let base = (local_now / WHEEL_SECS).floor() * WHEEL_SECS;
    let mut recovered = base + mark.0 as f64 / 1000.0;
    if recovered < local_now {
        recovered += WHEEL_SECS;
    }
    recovered
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip_within_skew() {
        let relative = 1_549_305_460.0;
        let (future, mark) = encode(relative, 5.0);
        assert_eq!(future, 1_549_305_465.0);

        let recovered = decode(mark, 1_549_305_459.0);
        assert!((recovered - future).abs() < 0.001);

        let recovered = decode(mark, 1_549_305_461.8);
        assert!((recovered - future).abs() < 0.001);
    }

    #[test]
    fn round_trip_across_wheel_boundary() {
        // future_ts lands just after a minute boundary; decode from just
        // before it, forcing the "add 60s" branch.
        let relative = 1_549_305_458.5;
        let (future, mark) = encode(relative, 2.0);
        let recovered = decode(mark, relative);
        assert!((recovered - future).abs() < 0.001);
    }

    #[test]
    fn every_horizon_up_to_29s_round_trips() {
        let relative = 1_700_000_000.123;
        let mut l = 0.0;
        while l <= 29.0 {
            let (future, mark) = encode(relative, l);
            let recovered = decode(mark, relative);
            assert!(
                (recovered - future).abs() < 0.001,
                "L={l} future={future} recovered={recovered}"
            );
            l += 0.37;
        }
    }

    #[test]
    fn horizon_of_60s_is_ambiguous() {
        // At L=60s the mark wraps back to the same value as L=0, so
        // decoding cannot recover the original instant. This is the
        // documented ambiguity, not a bug.
        let relative = 1_700_000_000.0;
        let (_, mark_at_l0) = encode(relative, 0.0);
        let (future_at_l60, mark_at_l60) = encode(relative, 60.0);
        assert_eq!(mark_at_l0, mark_at_l60);
        let recovered = decode(mark_at_l60, relative);
        assert!((recovered - future_at_l60).abs() > 1.0);
    }

    #[test]
    fn decode_tolerates_small_negative_skew() {
        // Receiver clock running slightly ahead of the sender's.
        let relative = 1_700_000_100.0;
        let (future, mark) = encode(relative, 10.0);
        let recovered = decode(mark, relative + 2.0);
        assert!((recovered - future).abs() < 0.001);
    }
}
