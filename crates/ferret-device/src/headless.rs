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

//! Backends without any hardware behind them.
//!
//! They hand out counters as native handles, keep track of what is alive, and
//! let a [`HeadlessControl`] simulate device loss from any thread. Used by the
//! headless player and by tests.

use crate::audio::{AudioBackend, NativeVoice, SoundDesc, VoiceCallback};
use crate::graph::{GraphBackend, NativeHandle, RenderTargetDesc, TextureDesc};
use ferret_core::FerretError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct Voice {
    callback: VoiceCallback,
    playing: bool,
    queued_samples: usize,
}

#[derive(Default)]
struct Shared {
    lost: AtomicBool,
    fail_next_create: AtomicBool,
    next: AtomicU64,
    presents: AtomicU64,
    live: Mutex<HashSet<u64>>,
    voices: Mutex<HashMap<u64, Voice>>,
}

impl Shared {
    fn allocate(&self) -> u64 {
        let handle = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        guard(&self.live).insert(handle);
        handle
    }

    fn free(&self, handle: u64) {
        guard(&self.live).remove(&handle);
    }

    fn create_root(&self) -> Result<u64, FerretError> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(FerretError::Backend("simulated creation failure".into()));
        }
        self.lost.store(false, Ordering::SeqCst);
        Ok(self.allocate())
    }

    fn check_lost(&self) -> Result<(), FerretError> {
        if self.lost.load(Ordering::SeqCst) {
            Err(FerretError::DeviceLost("headless".into()))
        } else {
            Ok(())
        }
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives a headless backend from the outside.
#[derive(Clone)]
pub struct HeadlessControl {
    shared: Arc<Shared>,
}

impl HeadlessControl {
    /// Simulates the loss of the native device.
    pub fn lose_device(&self) {
        self.shared.lost.store(true, Ordering::SeqCst);
    }

    /// Makes the next device creation fail.
    pub fn fail_next_create(&self) {
        self.shared.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Number of native objects currently alive, voices included.
    pub fn live_handles(&self) -> usize {
        guard(&self.shared.live).len()
    }

    /// Number of successful presents.
    pub fn presents(&self) -> u64 {
        self.shared.presents.load(Ordering::Relaxed)
    }

    /// Number of voices currently started.
    pub fn playing_voices(&self) -> usize {
        guard(&self.shared.voices)
            .values()
            .filter(|v| v.playing)
            .count()
    }

    /// Samples queued on all live voices.
    pub fn queued_samples(&self) -> usize {
        guard(&self.shared.voices)
            .values()
            .map(|v| v.queued_samples)
            .sum()
    }

    /// Ends the buffer of every started voice, firing their callbacks from
    /// the calling thread.
    ///
    /// ## Returns
    /// The number of callbacks fired.
    pub fn finish_playing(&self) -> usize {
        let callbacks: Vec<VoiceCallback> = guard(&self.shared.voices)
            .values_mut()
            .filter(|v| v.playing)
            .map(|v| {
                v.playing = false;
                v.queued_samples = 0;
                v.callback.clone()
            })
            .collect();
        for callback in &callbacks {
            callback.buffer_end();
        }
        callbacks.len()
    }
}

impl std::fmt::Debug for HeadlessControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessControl")
            .field("lost", &self.shared.lost.load(Ordering::Relaxed))
            .field("live", &self.live_handles())
            .finish()
    }
}

/// A graphics backend that draws nothing.
pub struct HeadlessGraphBackend {
    shared: Arc<Shared>,
}

impl HeadlessGraphBackend {
    /// Creates the backend and its control handle.
    pub fn new() -> (Self, HeadlessControl) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: Arc::clone(&shared),
            },
            HeadlessControl { shared },
        )
    }
}

impl GraphBackend for HeadlessGraphBackend {
    fn create_device(&mut self) -> Result<NativeHandle, FerretError> {
        self.shared.create_root().map(NativeHandle)
    }

    fn destroy_device(&mut self, device: NativeHandle) {
        self.shared.free(device.0);
    }

    fn is_device_lost(&self, _device: NativeHandle) -> bool {
        self.shared.lost.load(Ordering::SeqCst)
    }

    fn create_texture(
        &mut self,
        _device: NativeHandle,
        _desc: &TextureDesc,
    ) -> Result<NativeHandle, FerretError> {
        self.shared.check_lost()?;
        Ok(NativeHandle(self.shared.allocate()))
    }

    fn create_render_target(
        &mut self,
        _device: NativeHandle,
        _desc: &RenderTargetDesc,
    ) -> Result<NativeHandle, FerretError> {
        self.shared.check_lost()?;
        Ok(NativeHandle(self.shared.allocate()))
    }

    fn release(&mut self, resource: NativeHandle) {
        self.shared.free(resource.0);
    }

    fn present(&mut self, _device: NativeHandle, _vsync: bool) -> Result<(), FerretError> {
        self.shared.check_lost()?;
        self.shared.presents.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// An audio backend that plays nothing.
pub struct HeadlessAudioBackend {
    shared: Arc<Shared>,
    engine: Option<u64>,
}

impl HeadlessAudioBackend {
    /// Creates the backend and its control handle.
    pub fn new() -> (Self, HeadlessControl) {
        let shared = Arc::new(Shared::default());
        (
            Self {
                shared: Arc::clone(&shared),
                engine: None,
            },
            HeadlessControl { shared },
        )
    }
}

impl AudioBackend for HeadlessAudioBackend {
    fn create_engine(&mut self) -> Result<(), FerretError> {
        self.engine = Some(self.shared.create_root()?);
        Ok(())
    }

    fn destroy_engine(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.shared.free(engine);
        }
    }

    fn is_engine_lost(&self) -> bool {
        self.shared.lost.load(Ordering::SeqCst)
    }

    fn create_voice(
        &mut self,
        _desc: &SoundDesc,
        callback: VoiceCallback,
    ) -> Result<Box<dyn NativeVoice>, FerretError> {
        self.shared.check_lost()?;
        let id = self.shared.allocate();
        guard(&self.shared.voices).insert(
            id,
            Voice {
                callback,
                playing: false,
                queued_samples: 0,
            },
        );
        Ok(Box::new(HeadlessVoice {
            id,
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct HeadlessVoice {
    id: u64,
    shared: Arc<Shared>,
}

impl HeadlessVoice {
    fn with_voice(&self, f: impl FnOnce(&mut Voice)) {
        if let Some(voice) = guard(&self.shared.voices).get_mut(&self.id) {
            f(voice);
        }
    }
}

impl NativeVoice for HeadlessVoice {
    fn start(&mut self) -> Result<(), FerretError> {
        self.shared.check_lost()?;
        self.with_voice(|v| v.playing = true);
        Ok(())
    }

    fn stop(&mut self) {
        self.with_voice(|v| v.playing = false);
    }

    fn submit(&mut self, samples: &[f32]) -> Result<(), FerretError> {
        self.shared.check_lost()?;
        self.with_voice(|v| v.queued_samples += samples.len());
        Ok(())
    }

    fn flush(&mut self) {
        self.with_voice(|v| v.queued_samples = 0);
    }
}

impl Drop for HeadlessVoice {
    fn drop(&mut self) {
        guard(&self.shared.voices).remove(&self.id);
        self.shared.free(self.id);
    }
}
