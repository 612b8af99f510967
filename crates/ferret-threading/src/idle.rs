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

//! Deferred main-thread work that runs once the application goes quiet.
//!
//! There is a single deadline for all idle work. Adding work (re)arms it; the
//! main loop calls [`IdleMaster::poll`] with the time of the last real user
//! activity, and the work fires once neither has happened for the idle window.

use crate::lock;
use ferret_core::WorkItem;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default quiet period before idle work runs.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(100);
/// Longest accepted quiet period.
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Handle to a piece of idle work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdleWorkId(pub u64);

/// Configuration for an [`IdleMaster`].
#[derive(Debug, Clone)]
pub struct IdleConfig {
    /// Quiet period before idle work runs.
    pub timeout: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

#[derive(Default)]
struct IdleState {
    work: Vec<(IdleWorkId, Arc<dyn WorkItem>)>,
    armed_at: Option<Instant>,
    next_id: u64,
}

/// Queue of idle work, shareable across threads.
pub struct IdleMaster {
    state: Mutex<IdleState>,
    timeout: Duration,
}

impl IdleMaster {
    /// Creates an idle master. The timeout is capped at [`MAX_IDLE_TIMEOUT`].
    pub fn new(config: IdleConfig) -> Self {
        Self {
            state: Mutex::new(IdleState::default()),
            timeout: config.timeout.min(MAX_IDLE_TIMEOUT),
        }
    }

    /// Queues work for the next idle period and re-arms the deadline.
    pub fn add(&self, item: Arc<dyn WorkItem>) -> IdleWorkId {
        let mut state = lock(&self.state);
        let id = IdleWorkId(state.next_id);
        state.next_id += 1;
        log::trace!("Idle work '{}' queued as #{}.", item.name(), id.0);
        state.work.push((id, item));
        state.armed_at = Some(Instant::now());
        id
    }

    /// Removes queued idle work and calls its `on_cancel`.
    ///
    /// ## Returns
    /// `false` if it already ran or is unknown.
    pub fn remove(&self, id: IdleWorkId) -> bool {
        let item = {
            let mut state = lock(&self.state);
            let position = state.work.iter().position(|(w, _)| *w == id);
            let item = position.map(|p| state.work.remove(p).1);
            if state.work.is_empty() {
                state.armed_at = None;
            }
            item
        };
        match item {
            Some(item) => {
                item.on_cancel();
                true
            }
            None => false,
        }
    }

    /// Arms the deadline unless it is already armed.
    pub fn kick_idle(&self) {
        let mut state = lock(&self.state);
        if state.armed_at.is_none() {
            state.armed_at = Some(Instant::now());
        }
    }

    /// Runs all queued idle work now, regardless of activity.
    ///
    /// ## Returns
    /// The number of items run.
    pub fn force_idle(&self) -> usize {
        let work = self.take_all();
        Self::run_all(work)
    }

    /// Runs the queued work if the application has been quiet long enough.
    ///
    /// Must be called on the main thread.
    ///
    /// ## Arguments
    /// * `now` - the current time.
    /// * `last_activity` - when the last real user input arrived.
    ///
    /// ## Returns
    /// The number of items run.
    pub fn poll(&self, now: Instant, last_activity: Instant) -> usize {
        let due = {
            let state = lock(&self.state);
            match state.armed_at {
                Some(armed_at) => {
                    now.saturating_duration_since(armed_at.max(last_activity)) >= self.timeout
                }
                None => false,
            }
        };
        if !due {
            return 0;
        }
        let work = self.take_all();
        Self::run_all(work)
    }

    /// When the queued work becomes due, if the deadline is armed.
    pub fn deadline(&self, last_activity: Instant) -> Option<Instant> {
        lock(&self.state)
            .armed_at
            .map(|armed_at| armed_at.max(last_activity) + self.timeout)
    }

    /// Returns `true` if the deadline is armed.
    pub fn is_armed(&self) -> bool {
        lock(&self.state).armed_at.is_some()
    }

    /// Number of queued items.
    pub fn pending_count(&self) -> usize {
        lock(&self.state).work.len()
    }

    /// The configured quiet period.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn take_all(&self) -> Vec<(IdleWorkId, Arc<dyn WorkItem>)> {
        let mut state = lock(&self.state);
        state.armed_at = None;
        std::mem::take(&mut state.work)
    }

    fn run_all(work: Vec<(IdleWorkId, Arc<dyn WorkItem>)>) -> usize {
        let count = work.len();
        for (_, item) in work {
            item.run();
            item.on_complete();
        }
        if count > 0 {
            log::trace!("Ran {count} idle work items.");
        }
        count
    }
}

impl Default for IdleMaster {
    fn default() -> Self {
        Self::new(IdleConfig::default())
    }
}

impl Drop for IdleMaster {
    fn drop(&mut self) {
        let leftovers = std::mem::take(&mut lock(&self.state).work);
        for (_, item) in leftovers {
            item.on_cancel();
        }
    }
}

impl std::fmt::Debug for IdleMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("IdleMaster")
            .field("pending", &state.work.len())
            .field("armed", &state.armed_at.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}
