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

//! Releases values away from the thread that finished with them.
//!
//! A callback thread (an audio voice, say) must not destroy the object it is
//! running inside. It hands the value to a [`DropHandle`] instead, and the
//! owner later drops everything on the main thread or a pool worker.

use crate::pool::ThreadPool;
use crossbeam_channel::{Receiver, Sender};
use ferret_core::{WorkId, WorkItem};
use std::sync::{Arc, Mutex};

type Deferred = Box<dyn Send>;

/// Cloneable sending side of a [`DeferredDrop`] queue.
#[derive(Clone)]
pub struct DropHandle {
    sender: Sender<Deferred>,
}

impl DropHandle {
    /// Hands `value` over for a later drop.
    pub fn defer<T: Send + 'static>(&self, value: T) {
        if let Err(e) = self.sender.send(Box::new(value)) {
            // The queue is gone; dropping here is the only option left.
            log::warn!("Deferred drop queue closed, dropping in place.");
            drop(e.into_inner());
        }
    }
}

impl std::fmt::Debug for DropHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DropHandle").finish_non_exhaustive()
    }
}

/// A queue of values waiting to be dropped.
pub struct DeferredDrop {
    sender: Sender<Deferred>,
    receiver: Receiver<Deferred>,
}

impl DeferredDrop {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    /// Returns a handle other threads can defer through.
    pub fn handle(&self) -> DropHandle {
        DropHandle {
            sender: self.sender.clone(),
        }
    }

    /// Number of values waiting.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Drops every waiting value on the calling thread.
    pub fn drain(&self) -> usize {
        let batch: Vec<Deferred> = self.receiver.try_iter().collect();
        let count = batch.len();
        drop(batch);
        count
    }

    /// Moves every waiting value to `pool` and drops it on a worker.
    ///
    /// ## Returns
    /// The submission, or `None` if nothing was waiting or the pool is closed
    /// (in which case the values were dropped here).
    pub fn drain_on(&self, pool: &ThreadPool) -> Option<WorkId> {
        let batch: Vec<Deferred> = self.receiver.try_iter().collect();
        if batch.is_empty() {
            return None;
        }
        pool.add(Arc::new(DropBatch(Mutex::new(batch))))
    }
}

impl Default for DeferredDrop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeferredDrop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredDrop")
            .field("pending", &self.pending())
            .finish()
    }
}

struct DropBatch(Mutex<Vec<Deferred>>);

impl WorkItem for DropBatch {
    fn run(&self) {
        let batch = std::mem::take(&mut *crate::lock(&self.0));
        log::trace!("Dropping {} deferred values.", batch.len());
    }

    fn name(&self) -> &str {
        "deferred drop"
    }
}
