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

//! The contract for asynchronous units of work.

use std::fmt;

/// Opaque handle to a submitted work item.
///
/// A scheduler owns the canonical reference to the item while it is queued or
/// running; callers keep this handle to wait on or cancel it. Once the item has
/// completed or been cancelled the handle simply stops matching anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkId(pub u64);

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "work#{}", self.0)
    }
}

/// A unit of schedulable asynchronous work.
///
/// `run` executes on a worker thread (or, for idle work, on the main thread).
/// `on_complete` and `on_cancel` only ever execute on the main thread, and
/// exactly one of them fires, exactly once, per submission.
pub trait WorkItem: Send + Sync {
    /// Scheduling priority. Larger values run first.
    fn priority(&self) -> i32 {
        0
    }

    /// The work itself.
    fn run(&self);

    /// Called on the main thread after `run` returned.
    fn on_complete(&self) {}

    /// Called on the main thread if the item was removed before it started.
    fn on_cancel(&self) {}

    /// A short label for logs.
    fn name(&self) -> &str {
        "work item"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl WorkItem for Noop {
        fn run(&self) {}
    }

    #[test]
    fn defaults_are_neutral() {
        let item = Noop;
        assert_eq!(item.priority(), 0);
        assert_eq!(item.name(), "work item");
        item.on_complete();
        item.on_cancel();
    }

    #[test]
    fn work_id_display() {
        assert_eq!(WorkId(7).to_string(), "work#7");
    }
}
