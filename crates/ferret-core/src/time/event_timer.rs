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

//! Periodic timer used to pace frames when vsync is off.

use crate::error::FerretError;
use crate::message::MessageQueue;
use crossbeam_channel::{select, Receiver};
use std::time::{Duration, Instant};

/// Why [`EventTimer::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerWait {
    /// The timer period elapsed.
    Fired,
    /// A main-thread message arrived and was processed.
    Message,
    /// Neither happened before the timeout.
    TimedOut,
}

/// A periodic timer that wakes the main loop at a fixed interval.
///
/// Missed periods coalesce: a slow consumer sees one pending tick, never a
/// backlog.
#[derive(Debug)]
pub struct EventTimer {
    ticks: Receiver<Instant>,
    interval: Duration,
}

impl EventTimer {
    /// Longest interval the timer accepts.
    pub const MAX_INTERVAL: Duration = Duration::from_secs(1);

    /// Starts a timer firing every `interval`.
    ///
    /// # Errors
    /// Returns [`FerretError::InvalidTimerInterval`] for a zero interval or one
    /// longer than [`MAX_INTERVAL`](Self::MAX_INTERVAL).
    pub fn start(interval: Duration) -> Result<Self, FerretError> {
        if interval.is_zero() || interval > Self::MAX_INTERVAL {
            return Err(FerretError::InvalidTimerInterval(interval));
        }
        log::debug!("Event timer started with a {interval:?} period.");
        Ok(Self {
            ticks: crossbeam_channel::tick(interval),
            interval,
        })
    }

    /// Starts a timer firing `frames_per_second` times a second.
    pub fn for_frame_rate(frames_per_second: f64) -> Result<Self, FerretError> {
        if !frames_per_second.is_finite() || frames_per_second <= 0.0 {
            return Err(FerretError::InvalidTimerInterval(Duration::ZERO));
        }
        let interval = Duration::try_from_secs_f64(1.0 / frames_per_second)
            .map_err(|_| FerretError::InvalidTimerInterval(Duration::MAX))?;
        Self::start(interval)
    }

    /// The timer period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Blocks until the timer fires, a main-thread message arrives, or
    /// `timeout` elapses.
    ///
    /// Messages received while waiting are processed by `queue`, so posted
    /// closures keep running.
    pub fn wait(&self, queue: &MessageQueue, timeout: Duration) -> TimerWait {
        select! {
            recv(self.ticks) -> _ => {
                while self.ticks.try_recv().is_ok() {}
                TimerWait::Fired
            }
            recv(queue.receiver()) -> message => {
                if let Ok(message) = message {
                    queue.dispatch(message);
                    queue.pump_pending();
                }
                TimerWait::Message
            }
            default(timeout) => TimerWait::TimedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unusable_intervals() {
        assert!(EventTimer::start(Duration::ZERO).is_err());
        assert!(EventTimer::start(Duration::from_secs(5)).is_err());
        assert!(EventTimer::for_frame_rate(0.0).is_err());
        assert!(EventTimer::for_frame_rate(f64::NAN).is_err());
        assert!(EventTimer::for_frame_rate(1e-20).is_err());
        assert!(EventTimer::for_frame_rate(f64::MIN_POSITIVE).is_err());
    }

    #[test]
    fn fires_after_interval() {
        let queue = MessageQueue::new();
        let timer = EventTimer::start(Duration::from_millis(5)).unwrap();
        assert_eq!(
            timer.wait(&queue, Duration::from_secs(1)),
            TimerWait::Fired
        );
    }

    #[test]
    fn wakes_for_messages_and_processes_them() {
        let queue = MessageQueue::new();
        let timer = EventTimer::start(Duration::from_millis(500)).unwrap();
        queue.sender().post_quit(0);
        assert_eq!(
            timer.wait(&queue, Duration::from_secs(1)),
            TimerWait::Message
        );
        assert_eq!(queue.quit_code(), Some(0));
    }

    #[test]
    fn frame_rate_sets_interval() {
        let timer = EventTimer::for_frame_rate(50.0).unwrap();
        assert!((timer.interval().as_secs_f64() - 0.02).abs() < 1e-6);
    }
}
