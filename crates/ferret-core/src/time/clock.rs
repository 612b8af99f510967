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

//! Raw high-resolution clock sources.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A source of raw monotonic-ish ticks.
///
/// The [`Timer`](super::Timer) never assumes the source is strictly monotonic:
/// a sample lower than the previous one triggers its repair path.
pub trait ClockSource: Send {
    /// Returns the current raw tick count.
    fn raw_time(&self) -> i64;

    /// Returns the number of raw ticks per second.
    fn frequency(&self) -> i64;
}

/// The process clock, backed by [`Instant`] with nanosecond ticks.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose tick zero is "now".
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for SystemClock {
    #[inline]
    fn raw_time(&self) -> i64 {
        i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    #[inline]
    fn frequency(&self) -> i64 {
        1_000_000_000
    }
}

/// A clock driven by hand, for deterministic timing in tests and tools.
///
/// Clones share the same counter, so a test can keep one handle while the
/// timer owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    ticks: Arc<AtomicI64>,
    frequency: i64,
}

impl ManualClock {
    /// Creates a manual clock at tick zero with the given frequency.
    pub fn new(frequency: i64) -> Self {
        Self {
            ticks: Arc::new(AtomicI64::new(0)),
            frequency: frequency.max(1),
        }
    }

    /// Moves the clock forward (or backward, with a negative value).
    pub fn advance(&self, ticks: i64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Moves the clock forward by a number of seconds.
    pub fn advance_seconds(&self, seconds: f64) {
        self.advance((seconds * self.frequency as f64).round() as i64);
    }

    /// Sets the absolute tick count.
    pub fn set(&self, ticks: i64) {
        self.ticks.store(ticks, Ordering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn raw_time(&self) -> i64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn frequency(&self) -> i64 {
        self.frequency
    }
}
