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

//! Frame and advance rates averaged over one-second windows.

/// Rates measured over the last completed window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRates {
    /// Rendered frames per second.
    pub frames_per_second: f64,
    /// Simulation advances per second.
    pub advances_per_second: f64,
    /// Frames whose advance count hit the cap.
    pub capped_frames: u32,
}

/// Accumulates per-frame counters, driven by timer seconds.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    window_start: Option<f64>,
    frames: u32,
    advances: u32,
    capped: u32,
    last: Option<FrameRates>,
}

impl FrameStats {
    /// Length of an averaging window in seconds.
    pub const WINDOW_SECONDS: f64 = 1.0;

    /// Creates empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one frame at timer time `now`.
    ///
    /// A `now` earlier than the window start (the timer was reset) discards
    /// the open window and starts a new one.
    ///
    /// ## Returns
    /// The rates of the window that just closed, if any.
    pub fn record_frame(&mut self, now: f64, advances: u32, capped: bool) -> Option<FrameRates> {
        let start = match self.window_start {
            Some(start) if now >= start => start,
            _ => {
                self.restart(now);
                now
            }
        };
        self.frames += 1;
        self.advances += advances;
        if capped {
            self.capped += 1;
        }

        let elapsed = now - start;
        if elapsed < Self::WINDOW_SECONDS {
            return None;
        }

        let rates = FrameRates {
            frames_per_second: f64::from(self.frames) / elapsed,
            advances_per_second: f64::from(self.advances) / elapsed,
            capped_frames: self.capped,
        };
        log::trace!(
            "{:.1} fps, {:.1} aps, {} capped.",
            rates.frames_per_second,
            rates.advances_per_second,
            rates.capped_frames
        );
        self.restart(now);
        self.last = Some(rates);
        Some(rates)
    }

    fn restart(&mut self, now: f64) {
        self.window_start = Some(now);
        self.frames = 0;
        self.advances = 0;
        self.capped = 0;
    }

    /// Rates of the most recent completed window.
    pub fn last(&self) -> Option<FrameRates> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_closes_after_one_second() {
        let mut stats = FrameStats::new();
        assert!(stats.record_frame(0.0, 0, false).is_none());
        assert!(stats.record_frame(0.5, 2, true).is_none());
        let rates = stats.record_frame(1.0, 2, false).unwrap();

        assert_eq!(rates.frames_per_second, 3.0);
        assert_eq!(rates.advances_per_second, 4.0);
        assert_eq!(rates.capped_frames, 1);
        assert_eq!(stats.last(), Some(rates));

        // Counters restart with the new window.
        assert!(stats.record_frame(1.5, 1, false).is_none());
    }

    #[test]
    fn timer_reset_restarts_the_window() {
        let mut stats = FrameStats::new();
        stats.record_frame(10.0, 1, false);
        stats.record_frame(10.9, 1, false);

        // The timer went back to zero.
        assert!(stats.record_frame(0.0, 1, false).is_none());
        assert!(stats.record_frame(0.5, 1, false).is_none());
        let rates = stats.record_frame(1.0, 1, false).unwrap();
        assert_eq!(rates.frames_per_second, 3.0);
        assert!(rates.advances_per_second > 0.0);
    }
}
