// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::clock::{ClockSource, SystemClock};
use std::fmt;

/// Monotonic elapsed-time measurement with an adjustable time scale.
///
/// `Timer` wraps a raw [`ClockSource`] and converts its ticks into (scaled)
/// seconds. It also keeps "stored" raw checkpoints so callers can time
/// sub-phases of a frame (advance vs. render) without extra state.
pub struct Timer {
    clock: Box<dyn ClockSource>,
    freq: i64,
    start_time: i64,
    start_seconds: f64,
    raw_time: i64,
    seconds: f64,
    time_scale: f64,
    num_ticks: u64,
    ticks_per_second: u32,
    tps_count: u32,
    tps_start: i64,
    stored_raw_time: i64,
    stored_tick_raw_time: i64,
}

impl Timer {
    /// Creates a timer on the process clock.
    /// ## Returns
    /// A new, freshly reset `Timer`.
    pub fn new() -> Self {
        Self::with_clock(Box::new(SystemClock::new()))
    }

    /// Creates a timer reading from the given clock source.
    /// ## Arguments
    /// * `clock` - The raw tick source.
    /// ## Returns
    /// A new, freshly reset `Timer`.
    pub fn with_clock(clock: Box<dyn ClockSource>) -> Self {
        let freq = clock.frequency().max(1);
        let mut timer = Self {
            clock,
            freq,
            start_time: 0,
            start_seconds: 0.0,
            raw_time: 0,
            seconds: 0.0,
            time_scale: 1.0,
            num_ticks: 0,
            ticks_per_second: 0,
            tps_count: 0,
            tps_start: 0,
            stored_raw_time: 0,
            stored_tick_raw_time: 0,
        };
        timer.reset();
        timer
    }

    /// Returns the seconds elapsed since the previous tick.
    ///
    /// If the raw clock went backwards (e.g. after a CPU migration), the timer
    /// resets itself and reports `0.0` from the new baseline.
    pub fn tick(&mut self) -> f64 {
        let now = self.clock.raw_time();
        let new_seconds = self.seconds_at(now);
        let delta = new_seconds - self.seconds;

        if now < self.raw_time || delta < 0.0 {
            log::debug!(
                "Timer clock went backwards ({} -> {}), resetting.",
                self.raw_time,
                now
            );
            self.reset();
            return 0.0;
        }

        self.raw_time = now;
        self.seconds = new_seconds;
        self.num_ticks += 1;

        self.tps_count += 1;
        if now - self.tps_start >= self.freq {
            self.ticks_per_second = self.tps_count;
            self.tps_count = 0;
            self.tps_start = now;
        }

        delta
    }

    /// Restarts the timer at the current raw time with zero elapsed seconds.
    pub fn reset(&mut self) {
        let now = self.clock.raw_time();
        self.start_time = now;
        self.start_seconds = 0.0;
        self.raw_time = now;
        self.seconds = 0.0;
        self.num_ticks = 0;
        self.ticks_per_second = 0;
        self.tps_count = 0;
        self.tps_start = now;
        self.stored_raw_time = now;
        self.stored_tick_raw_time = now;
    }

    /// Changes the time scale without a visible jump in [`seconds`](Self::seconds).
    pub fn set_time_scale(&mut self, scale: f64) {
        let scale = if scale.is_finite() { scale.max(0.0) } else { 1.0 };
        let now = self.clock.raw_time();
        self.start_seconds = self.seconds_at(now);
        self.start_time = now;
        self.time_scale = scale;
    }

    /// Returns the raw ticks elapsed since the previous call and stores "now".
    pub fn current_stored_raw_time(&mut self) -> i64 {
        let now = self.clock.raw_time();
        let elapsed = now - self.stored_raw_time;
        self.stored_raw_time = now;
        elapsed
    }

    /// Returns the raw ticks between the last tick and the previous call.
    pub fn last_tick_stored_raw_time(&mut self) -> i64 {
        let elapsed = self.raw_time - self.stored_tick_raw_time;
        self.stored_tick_raw_time = self.raw_time;
        elapsed
    }

    /// Seconds at the last tick, scaled.
    #[inline]
    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// Seconds right now, scaled, without ticking.
    pub fn current_seconds(&self) -> f64 {
        self.seconds_at(self.clock.raw_time())
    }

    /// Reads the raw clock without touching timer state.
    #[inline]
    pub fn current_raw_time(&self) -> i64 {
        self.clock.raw_time()
    }

    /// Raw clock value sampled by the last tick.
    #[inline]
    pub fn raw_time(&self) -> i64 {
        self.raw_time
    }

    /// Raw ticks per second of the underlying clock.
    #[inline]
    pub fn frequency(&self) -> i64 {
        self.freq
    }

    /// Ticks since the last reset.
    #[inline]
    pub fn num_ticks(&self) -> u64 {
        self.num_ticks
    }

    /// Tick rate measured over the last full wall-clock second.
    #[inline]
    pub fn ticks_per_second(&self) -> u32 {
        self.ticks_per_second
    }

    /// Current time scale.
    #[inline]
    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    /// Converts a raw tick count into unscaled seconds.
    #[inline]
    pub fn raw_to_seconds(&self, raw: i64) -> f64 {
        raw as f64 / self.freq as f64
    }

    fn seconds_at(&self, raw: i64) -> f64 {
        self.start_seconds + self.raw_to_seconds(raw - self.start_time) * self.time_scale
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("seconds", &self.seconds)
            .field("num_ticks", &self.num_ticks)
            .field("ticks_per_second", &self.ticks_per_second)
            .field("time_scale", &self.time_scale)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use approx::assert_relative_eq;

    const FREQ: i64 = 1_000;

    fn manual_timer() -> (Timer, ManualClock) {
        let clock = ManualClock::new(FREQ);
        let timer = Timer::with_clock(Box::new(clock.clone()));
        (timer, clock)
    }

    #[test]
    fn tick_reports_elapsed_seconds() {
        let (mut timer, clock) = manual_timer();
        clock.advance(250);
        assert_relative_eq!(timer.tick(), 0.25);
        clock.advance(500);
        assert_relative_eq!(timer.tick(), 0.5);
        assert_relative_eq!(timer.seconds(), 0.75);
        assert_eq!(timer.num_ticks(), 2);
    }

    #[test]
    fn clock_regression_resets_instead_of_going_negative() {
        let (mut timer, clock) = manual_timer();
        clock.advance(400);
        timer.tick();
        timer.tick();
        assert_eq!(timer.num_ticks(), 2);

        clock.advance(-300);
        let delta = timer.tick();
        assert!(delta >= 0.0, "delta must never be negative, got {delta}");
        assert_eq!(delta, 0.0);
        assert_eq!(timer.num_ticks(), 0);
        assert_eq!(timer.seconds(), 0.0);

        // Timing continues from the new baseline.
        clock.advance(100);
        assert_relative_eq!(timer.tick(), 0.1);
    }

    #[test]
    fn time_scale_change_is_continuous() {
        let (mut timer, clock) = manual_timer();
        clock.advance(1_000);
        timer.tick();
        assert_relative_eq!(timer.seconds(), 1.0);

        timer.set_time_scale(0.5);
        assert_relative_eq!(timer.current_seconds(), 1.0);

        clock.advance(1_000);
        assert_relative_eq!(timer.tick(), 0.5);
        assert_relative_eq!(timer.seconds(), 1.5);
    }

    #[test]
    fn ticks_per_second_updates_once_per_second() {
        let (mut timer, clock) = manual_timer();
        for _ in 0..9 {
            clock.advance(100);
            timer.tick();
        }
        assert_eq!(timer.ticks_per_second(), 0);
        clock.advance(100);
        timer.tick();
        assert_eq!(timer.ticks_per_second(), 10);
    }

    #[test]
    fn stored_raw_time_measures_between_calls() {
        let (mut timer, clock) = manual_timer();
        clock.advance(30);
        assert_eq!(timer.current_stored_raw_time(), 30);
        clock.advance(12);
        assert_eq!(timer.current_stored_raw_time(), 12);

        clock.advance(8);
        timer.tick();
        assert_eq!(timer.last_tick_stored_raw_time(), 50);
        assert_eq!(timer.last_tick_stored_raw_time(), 0);
    }

    #[test]
    fn system_clock_timer_never_goes_backwards() {
        let mut timer = Timer::new();
        for _ in 0..100 {
            assert!(timer.tick() >= 0.0);
        }
    }
}
