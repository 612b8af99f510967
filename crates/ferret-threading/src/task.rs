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

//! Background work that can be stopped cooperatively.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Stop flag observed by a running [`CancelableTask`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    stop: Arc<AtomicBool>,
}

impl CancelToken {
    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn cancel(&self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// A background thread that polls a [`CancelToken`].
///
/// Dropping the task cancels it and waits for the thread to finish, so
/// whatever the task borrows through `Arc`s is never released under it.
#[derive(Debug)]
pub struct CancelableTask {
    name: String,
    token: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl CancelableTask {
    /// Starts `work` on a named thread.
    ///
    /// # Errors
    /// Returns the OS error if the thread could not be created.
    pub fn spawn<F>(name: impl Into<String>, work: F) -> std::io::Result<Self>
    where
        F: FnOnce(&CancelToken) + Send + 'static,
    {
        let name = name.into();
        let token = CancelToken::default();
        let thread_token = token.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || work(&thread_token))?;
        Ok(Self {
            name,
            token,
            handle: Some(handle),
        })
    }

    /// Returns `true` once the work function returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Returns `true` if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Blocks until the work function returns, without cancelling it.
    pub fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Task '{}' panicked.", self.name);
            }
        }
    }

    /// Requests cancellation and blocks until the task is idle.
    pub fn cancel_and_wait(&mut self) {
        if self.handle.is_some() {
            log::debug!("Cancelling task '{}'.", self.name);
        }
        self.token.cancel();
        self.wait();
    }
}

impl Drop for CancelableTask {
    fn drop(&mut self) {
        self.cancel_and_wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn cancel_stops_a_polling_loop() {
        let iterations = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&iterations);
        let mut task = CancelableTask::spawn("spin", move |token| {
            while !token.is_cancelled() {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(1));
            }
        })
        .unwrap();

        thread::sleep(Duration::from_millis(10));
        task.cancel_and_wait();
        assert!(task.is_finished());
        assert!(task.is_cancelled());

        let seen = iterations.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(iterations.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn wait_lets_work_finish() {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        let mut task = CancelableTask::spawn("finish", move |_| {
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();
        task.wait();
        assert!(done.load(Ordering::SeqCst));
        assert!(!task.is_cancelled());
    }
}
