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

//! # Ferret Threading
//!
//! Everything that schedules [`WorkItem`](ferret_core::WorkItem)s: the
//! priority [`ThreadPool`], the main-thread [`IdleMaster`], coalesced command
//! refresh through [`CommandGroups`], plus [`DeferredDrop`] and
//! [`CancelableTask`] for resources that cannot be released where they are
//! finished with.

#![warn(missing_docs)]

pub mod commands;
pub mod deferred;
pub mod idle;
pub mod pool;
pub mod task;

pub use commands::{CommandGroups, CommandId, CommandListener, GroupId};
pub use deferred::{DeferredDrop, DropHandle};
pub use idle::{IdleConfig, IdleMaster, IdleWorkId};
pub use pool::{PoolConfig, ThreadPool};
pub use task::{CancelToken, CancelableTask};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this crate only mutates bookkeeping, never runs
/// user callbacks, so the data is consistent even after a poisoning panic.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
