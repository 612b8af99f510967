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

//! Timing primitives.
//!
//! Contents:
//! * [`Timer`]: raw clock wrapper with time scale and stored checkpoints
//! * [`GlobalTime`] / [`FrameTime`]: the fixed-step simulation clock and the
//!   per-frame record
//! * [`EventTimer`]: periodic wake-up for frame pacing without vsync

mod clock;
mod event_timer;
mod global_time;
mod timer;

pub use self::clock::{ClockSource, ManualClock, SystemClock};
pub use self::event_timer::{EventTimer, TimerWait};
pub use self::global_time::{
    FrameTime, GlobalTime, DEFAULT_ADVANCES_PER_SECOND, DEFAULT_FRAMES_PER_SECOND,
    DEFAULT_MAX_ADVANCES, MAX_ADVANCES_RANGE, RATE_RANGE,
};
pub use self::timer::Timer;
