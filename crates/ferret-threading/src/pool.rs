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

//! A priority thread pool whose completions are delivered on the main thread.
//!
//! Items move through three states: *ready* (queued, cancellable), *running*
//! (on a worker) and *completing* (finished, completion posted to the main
//! thread but not yet processed). Workers only ever call
//! [`WorkItem::run`]; [`WorkItem::on_complete`] and [`WorkItem::on_cancel`]
//! run on the thread owning the pool, outside the pool lock.

use crate::lock;
use ferret_core::{check_invariant, MainSender, MessageQueue, WorkId, WorkItem};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Hard upper bound on worker threads.
pub const MAX_POOL_THREADS: usize = 32;
/// Default cap applied to the CPU count.
pub const DEFAULT_POOL_THREADS: usize = 8;

/// How long `wait`/`flush` block on the message queue per iteration.
const PUMP_SLICE: Duration = Duration::from_millis(5);

/// Configuration for a [`ThreadPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of worker threads; clamped to `1..=32`.
    pub max_threads: usize,
    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl PoolConfig {
    /// Sizes the pool for `cpus` logical processors.
    pub fn for_cpus(cpus: usize) -> Self {
        Self {
            max_threads: cpus.clamp(1, DEFAULT_POOL_THREADS),
            ..Self::default()
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cpus = thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            max_threads: cpus.clamp(1, DEFAULT_POOL_THREADS),
            thread_name: "ferret-worker".to_owned(),
        }
    }
}

#[derive(Default)]
struct PoolState {
    /// Queued ids, highest priority first, FIFO among equals.
    ready: Vec<(WorkId, i32)>,
    running: HashSet<WorkId>,
    completing: HashSet<WorkId>,
    items: HashMap<WorkId, Arc<dyn WorkItem>>,
    busy: usize,
    threads: usize,
    kill: bool,
    closed: bool,
    next_id: u64,
}

impl PoolState {
    fn is_pending(&self, id: WorkId) -> bool {
        self.ready.iter().any(|&(r, _)| r == id)
            || self.running.contains(&id)
            || self.completing.contains(&id)
    }

    fn pending_count(&self) -> usize {
        self.ready.len() + self.running.len() + self.completing.len()
    }

    fn take_ready(&mut self) -> Vec<Arc<dyn WorkItem>> {
        let ids: Vec<WorkId> = self.ready.drain(..).map(|(id, _)| id).collect();
        ids.iter().filter_map(|id| self.items.remove(id)).collect()
    }
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_ready: Condvar,
}

/// A lazily grown pool of worker threads running [`WorkItem`]s by priority.
///
/// The pool belongs to the main thread: it keeps a handle on the
/// [`MessageQueue`] so that [`wait`](Self::wait) and [`flush`](Self::flush) can
/// keep pumping messages, which is also how completions get delivered.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    queue: Rc<MessageQueue>,
    main: MainSender,
    workers: RefCell<Vec<JoinHandle<()>>>,
    config: PoolConfig,
    process_shutting_down: Cell<bool>,
}

impl ThreadPool {
    /// Creates a pool. No thread is started until work arrives.
    pub fn new(queue: Rc<MessageQueue>, mut config: PoolConfig) -> Self {
        config.max_threads = config.max_threads.clamp(1, MAX_POOL_THREADS);
        log::debug!("Thread pool created (max {} threads).", config.max_threads);
        let main = queue.sender();
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState::default()),
                work_ready: Condvar::new(),
            }),
            queue,
            main,
            workers: RefCell::new(Vec::new()),
            config,
            process_shutting_down: Cell::new(false),
        }
    }

    /// Submits an item.
    ///
    /// The item is inserted after every queued item of greater or equal
    /// priority. A new worker is started only when every existing worker is
    /// busy and the limit is not reached.
    ///
    /// ## Returns
    /// The handle of the submission, or `None` if the pool no longer accepts
    /// work, in which case `on_cancel` has already been called.
    pub fn add(&self, item: Arc<dyn WorkItem>) -> Option<WorkId> {
        let priority = item.priority();
        let (id, spawn) = {
            let mut state = lock(&self.shared.state);
            if state.closed {
                drop(state);
                log::debug!("Pool is shut down, cancelling '{}'.", item.name());
                item.on_cancel();
                return None;
            }

            let id = WorkId(state.next_id);
            state.next_id += 1;
            let position = state
                .ready
                .iter()
                .position(|&(_, p)| p < priority)
                .unwrap_or(state.ready.len());
            state.ready.insert(position, (id, priority));
            state.items.insert(id, item);

            let spawn = state.busy >= state.threads && state.threads < self.config.max_threads;
            if spawn {
                state.threads += 1;
            }
            (id, spawn)
        };

        if spawn {
            self.spawn_worker();
        }
        self.shared.work_ready.notify_one();

        if self.process_shutting_down.get() {
            self.flush();
        }
        Some(id)
    }

    /// Removes a queued item and calls its `on_cancel`.
    ///
    /// ## Returns
    /// `false` if the item already started, finished or is unknown.
    pub fn cancel(&self, id: WorkId) -> bool {
        let item = {
            let mut state = lock(&self.shared.state);
            match state.ready.iter().position(|&(r, _)| r == id) {
                Some(position) => {
                    state.ready.remove(position);
                    state.items.remove(&id)
                }
                None => None,
            }
        };
        match item {
            Some(item) => {
                log::trace!("Cancelled {id} ('{}').", item.name());
                item.on_cancel();
                true
            }
            None => false,
        }
    }

    /// Pumps messages until `id` is neither queued, running nor completing.
    ///
    /// Completion callbacks of any item, including `id`, run inside this call.
    pub fn wait(&self, id: WorkId) {
        while self.is_pending(id) {
            self.queue.pump_wait(PUMP_SLICE);
        }
    }

    /// Pumps messages until every submitted item has completed.
    pub fn flush(&self) {
        while self.pending_count() > 0 {
            self.queue.pump_wait(PUMP_SLICE);
        }
    }

    /// Stops the pool: cancels queued items, joins every worker and delivers
    /// outstanding completions. Later submissions are cancelled on arrival.
    pub fn end_worker_threads(&self) {
        let cancelled = {
            let mut state = lock(&self.shared.state);
            state.closed = true;
            state.kill = true;
            state.take_ready()
        };
        self.shared.work_ready.notify_all();

        if !cancelled.is_empty() {
            log::debug!("Cancelling {} queued work items.", cancelled.len());
        }
        for item in cancelled {
            item.on_cancel();
        }

        let workers: Vec<_> = self.workers.borrow_mut().drain(..).collect();
        let joined = workers.len();
        for handle in workers {
            if handle.join().is_err() {
                log::error!("A pool worker terminated abnormally.");
            }
        }

        // Every worker posted its last completion before exiting.
        self.queue.pump_pending();

        let state = lock(&self.shared.state);
        check_invariant!(
            state.pending_count() == 0,
            "{} work items outlived the pool",
            state.pending_count()
        );
        if joined > 0 {
            log::info!("Thread pool stopped ({joined} workers joined).");
        }
    }

    /// Marks the owning process as shutting down: every later [`add`](Self::add)
    /// flushes synchronously.
    pub fn set_process_shutting_down(&self, shutting_down: bool) {
        self.process_shutting_down.set(shutting_down);
    }

    /// Returns `true` if `id` is queued, running or awaiting completion.
    pub fn is_pending(&self, id: WorkId) -> bool {
        lock(&self.shared.state).is_pending(id)
    }

    /// Number of items queued, running or awaiting completion.
    pub fn pending_count(&self) -> usize {
        lock(&self.shared.state).pending_count()
    }

    /// Number of live worker threads.
    pub fn thread_count(&self) -> usize {
        lock(&self.shared.state).threads
    }

    /// Number of workers currently inside `run`.
    pub fn busy_count(&self) -> usize {
        lock(&self.shared.state).busy
    }

    /// The configured maximum number of workers.
    pub fn max_threads(&self) -> usize {
        self.config.max_threads
    }

    fn spawn_worker(&self) {
        let index = self.workers.borrow().len();
        let shared = Arc::clone(&self.shared);
        let main = self.main.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{index}", self.config.thread_name))
            .spawn(move || worker_loop(shared, main, index));

        match spawned {
            Ok(handle) => self.workers.borrow_mut().push(handle),
            Err(e) => {
                log::error!("Failed to start pool worker: {e}");
                let orphaned = {
                    let mut state = lock(&self.shared.state);
                    state.threads -= 1;
                    if state.threads == 0 {
                        state.take_ready()
                    } else {
                        Vec::new()
                    }
                };
                // Nothing could ever run these.
                for item in orphaned {
                    item.on_cancel();
                }
            }
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.workers.borrow().is_empty() || self.pending_count() > 0 {
            self.end_worker_threads();
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = lock(&self.shared.state);
        f.debug_struct("ThreadPool")
            .field("threads", &state.threads)
            .field("busy", &state.busy)
            .field("ready", &state.ready.len())
            .field("max_threads", &self.config.max_threads)
            .finish()
    }
}

fn worker_loop(shared: Arc<PoolShared>, main: MainSender, index: usize) {
    log::debug!("Pool worker {index} started.");
    loop {
        let (id, item) = {
            let mut state = lock(&shared.state);
            loop {
                if state.kill {
                    state.threads -= 1;
                    log::debug!("Pool worker {index} exiting.");
                    return;
                }
                if !state.ready.is_empty() {
                    break;
                }
                state = shared
                    .work_ready
                    .wait(state)
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
            }
            let (id, _) = state.ready.remove(0);
            state.running.insert(id);
            state.busy += 1;
            (id, state.items.get(&id).cloned())
        };

        if let Some(item) = item {
            if panic::catch_unwind(AssertUnwindSafe(|| item.run())).is_err() {
                log::error!("Work item '{}' ({id}) panicked in run.", item.name());
            }
        }

        {
            let mut state = lock(&shared.state);
            state.running.remove(&id);
            state.completing.insert(id);
            state.busy -= 1;
        }

        let completion = Arc::clone(&shared);
        main.post(move || complete(&completion, id));
    }
}

/// Main-thread half of a completion.
fn complete(shared: &PoolShared, id: WorkId) {
    let item = {
        let mut state = lock(&shared.state);
        state.completing.remove(&id);
        state.items.remove(&id)
    };
    if let Some(item) = item {
        log::trace!("Completed {id} ('{}').", item.name());
        item.on_complete();
    }
}
