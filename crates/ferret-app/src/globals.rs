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

//! Process-wide services, passed around explicitly.

use ferret_core::{MainSender, MessageQueue};
use ferret_telemetry::system::MAX_WORKER_THREADS;
use ferret_telemetry::SystemInfo;
use ferret_threading::{IdleConfig, IdleMaster, PoolConfig, ThreadPool};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration of the process services.
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    /// Worker pool settings.
    pub pool: PoolConfig,
    /// Idle scheduling settings.
    pub idle: IdleConfig,
}

impl ProcessConfig {
    /// Sizes the worker pool for the given machine.
    pub fn for_system(system: &SystemInfo) -> Self {
        Self {
            pool: PoolConfig::for_cpus(system.worker_threads(MAX_WORKER_THREADS)),
            idle: IdleConfig::default(),
        }
    }
}

/// The main-thread message queue, the worker pool and the idle master.
///
/// Created once by [`init`](Self::init) on the main thread and handed to
/// whoever needs it. [`shutdown`](Self::shutdown) ends the workers; it also
/// runs on drop.
pub struct ProcessGlobals {
    queue: Rc<MessageQueue>,
    pool: ThreadPool,
    idle: Arc<IdleMaster>,
    shutting_down: Cell<bool>,
}

impl ProcessGlobals {
    /// Creates the process services.
    pub fn init(config: ProcessConfig) -> Self {
        let queue = Rc::new(MessageQueue::new());
        let pool = ThreadPool::new(Rc::clone(&queue), config.pool);
        let idle = Arc::new(IdleMaster::new(config.idle));
        log::info!(
            "Process globals initialized (up to {} workers, {:?} idle timeout).",
            pool.max_threads(),
            idle.timeout()
        );
        Self {
            queue,
            pool,
            idle,
            shutting_down: Cell::new(false),
        }
    }

    /// The main-thread message queue.
    pub fn queue(&self) -> &Rc<MessageQueue> {
        &self.queue
    }

    /// A handle for posting to the main thread from anywhere.
    pub fn sender(&self) -> MainSender {
        self.queue.sender()
    }

    /// The worker pool.
    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    /// The idle master.
    pub fn idle(&self) -> &Arc<IdleMaster> {
        &self.idle
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) started.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.get()
    }

    /// Runs idle work if the process has been quiet long enough.
    pub fn poll_idle(&self) -> usize {
        self.idle.poll(Instant::now(), self.queue.last_activity())
    }

    /// How long the main loop may block before idle work is due, capped at
    /// `max`.
    pub fn wait_timeout(&self, max: Duration) -> Duration {
        match self.idle.deadline(self.queue.last_activity()) {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()).min(max),
            None => max,
        }
    }

    /// Ends the worker threads. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.shutting_down.replace(true) {
            return;
        }
        log::info!("Shutting down process globals...");
        self.pool.set_process_shutting_down(true);
        self.pool.end_worker_threads();
        log::info!("Process globals shut down.");
    }
}

impl Drop for ProcessGlobals {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ProcessGlobals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessGlobals")
            .field("workers", &self.pool.thread_count())
            .field("pending_work", &self.pool.pending_count())
            .field("idle_work", &self.idle.pending_count())
            .field("shutting_down", &self.shutting_down.get())
            .finish()
    }
}
