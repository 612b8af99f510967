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

//! Process-wide simulation time and the per-frame timing record.

use std::ops::RangeInclusive;

/// Default number of fixed simulation steps per second.
pub const DEFAULT_ADVANCES_PER_SECOND: f64 = 60.0;
/// Default target frame rate when vsync is off.
pub const DEFAULT_FRAMES_PER_SECOND: f64 = 60.0;
/// Default cap on simulation steps taken in one frame.
pub const DEFAULT_MAX_ADVANCES: u32 = 4;
/// Accepted advance and frame rates, per second.
pub const RATE_RANGE: RangeInclusive<f64> = 1.0..=1000.0;
/// Accepted caps on simulation steps per frame.
pub const MAX_ADVANCES_RANGE: RangeInclusive<u32> = 1..=64;

/// Simulation clock shared by every window of the application.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalTime {
    /// Simulated seconds since startup (sum of all advances).
    pub absolute_seconds: f64,
    /// Wall-clock seconds not yet turned into advances.
    pub bank_seconds: f64,
    /// The fixed simulation step, `1 / advances_per_second`.
    pub delta_seconds: f64,
    /// Fixed simulation steps per second.
    pub advances_per_second: f64,
    /// Target rendered frames per second.
    pub frames_per_second: f64,
    /// Fraction of a step left in the bank, for interpolated rendering.
    pub bank_scale: f64,
}

impl GlobalTime {
    /// Creates a simulation clock for the given rates.
    pub fn new(advances_per_second: f64, frames_per_second: f64) -> Self {
        let mut time = Self {
            absolute_seconds: 0.0,
            bank_seconds: 0.0,
            delta_seconds: 0.0,
            advances_per_second: 0.0,
            frames_per_second: 0.0,
            bank_scale: 0.0,
        };
        time.set_rates(advances_per_second, frames_per_second);
        time
    }

    /// Recomputes the fixed step.
    ///
    /// Rates that are not positive and finite fall back to the defaults; the
    /// others are clamped to [`RATE_RANGE`].
    pub fn set_rates(&mut self, advances_per_second: f64, frames_per_second: f64) {
        self.advances_per_second = clamp_rate(advances_per_second, DEFAULT_ADVANCES_PER_SECOND);
        self.frames_per_second = clamp_rate(frames_per_second, DEFAULT_FRAMES_PER_SECOND);
        self.delta_seconds = 1.0 / self.advances_per_second;
    }

    /// Clears accumulated time, keeping the rates.
    pub fn reset(&mut self) {
        self.absolute_seconds = 0.0;
        self.bank_seconds = 0.0;
        self.bank_scale = 0.0;
    }
}

fn clamp_rate(rate: f64, default: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate.clamp(*RATE_RANGE.start(), *RATE_RANGE.end())
    } else {
        default
    }
}

impl Default for GlobalTime {
    fn default() -> Self {
        Self::new(DEFAULT_ADVANCES_PER_SECOND, DEFAULT_FRAMES_PER_SECOND)
    }
}

/// Timing record of a single rendered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameTime {
    /// Simulation advances taken this frame.
    pub advances: u32,
    /// Upper bound on `advances`.
    pub max_advances: u32,
    /// Vsync intervals waited this frame.
    pub vsync_count: u32,
    /// Raw timestamp at the start of each advance.
    pub advance_raw_times: Vec<i64>,
    /// Raw timestamp of the render, if one happened.
    pub render_raw_time: Option<i64>,
}

impl FrameTime {
    /// Creates an empty record; the cap is clamped to [`MAX_ADVANCES_RANGE`].
    pub fn new(max_advances: u32) -> Self {
        let max_advances =
            max_advances.clamp(*MAX_ADVANCES_RANGE.start(), *MAX_ADVANCES_RANGE.end());
        Self {
            advances: 0,
            max_advances,
            vsync_count: 0,
            advance_raw_times: Vec::with_capacity(max_advances as usize),
            render_raw_time: None,
        }
    }

    /// Clears the record for a new frame.
    pub fn reset(&mut self) {
        self.advances = 0;
        self.vsync_count = 0;
        self.advance_raw_times.clear();
        self.render_raw_time = None;
    }

    /// Returns `true` once `max_advances` steps were recorded.
    #[inline]
    pub fn is_capped(&self) -> bool {
        self.advances >= self.max_advances
    }

    /// Records the start of one simulation advance.
    pub fn record_advance(&mut self, raw_time: i64) {
        self.advances += 1;
        self.advance_raw_times.push(raw_time);
    }

    /// Records the render timestamp.
    pub fn record_render(&mut self, raw_time: i64) {
        self.render_raw_time = Some(raw_time);
    }

    /// Counts one vsync interval.
    pub fn record_vsync(&mut self) {
        self.vsync_count += 1;
    }
}

impl Default for FrameTime {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ADVANCES)
    }
}
