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

//! The audio device, sound effects and streamed music.
//!
//! Playback state lives on the device as two sets, *playing* and *paused*, so
//! pausing or resuming everything twice is harmless. Voices report the end of
//! their buffer from a backend callback thread; the report travels through a
//! channel and is handled by [`AudioDevice::process_events`] on the main
//! thread, which parks the finished voice in a deferred-drop queue. A voice is
//! therefore never destroyed from inside its own callback.
//!
//! On reset every voice is released before the old engine goes away. Children
//! that were playing start again on the new engine; paused ones stay paused.

use crate::registry::{ChildRegistration, ChildRegistry, DeviceChild};
use crate::DeviceState;
use crossbeam_channel::{Receiver, Sender};
use ferret_core::{FerretError, WorkId};
use ferret_threading::{CancelableTask, DeferredDrop, ThreadPool};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Format and data of a sound.
#[derive(Debug, Clone)]
pub struct SoundDesc {
    /// Debug label.
    pub label: String,
    /// Interleaved channel count.
    pub channels: u16,
    /// Samples per second.
    pub sample_rate: u32,
    /// Interleaved samples. Empty for streamed sounds.
    pub samples: Arc<[f32]>,
}

impl SoundDesc {
    /// Describes a sound without sample data, e.g. a stream.
    pub fn format(label: impl Into<String>, channels: u16, sample_rate: u32) -> Self {
        Self {
            label: label.into(),
            channels,
            sample_rate,
            samples: Arc::from(Vec::new()),
        }
    }
}

/// A native source voice. Dropping it destroys the voice.
pub trait NativeVoice: Send {
    /// Starts or resumes playback of the queued buffers.
    fn start(&mut self) -> Result<(), FerretError>;
    /// Stops playback, keeping the queued buffers.
    fn stop(&mut self);
    /// Queues samples.
    fn submit(&mut self, samples: &[f32]) -> Result<(), FerretError>;
    /// Discards the queued buffers.
    fn flush(&mut self);
}

/// Identifies an effect or stream on its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(pub u64);

#[derive(Debug, Clone, Copy)]
enum VoiceEvent {
    BufferEnd { effect: EffectId, serial: u64 },
}

/// Handed to the backend with each voice; callable from any thread.
#[derive(Debug, Clone)]
pub struct VoiceCallback {
    sender: Sender<VoiceEvent>,
    effect: EffectId,
    serial: u64,
}

impl VoiceCallback {
    /// Reports that the voice played its last queued buffer.
    pub fn buffer_end(&self) {
        let event = VoiceEvent::BufferEnd {
            effect: self.effect,
            serial: self.serial,
        };
        if self.sender.send(event).is_err() {
            log::trace!("Buffer end for a device that no longer exists.");
        }
    }

    /// The effect owning the voice.
    pub fn effect(&self) -> EffectId {
        self.effect
    }
}

/// The native audio API behind an [`AudioDevice`].
pub trait AudioBackend {
    /// Creates the native engine.
    fn create_engine(&mut self) -> Result<(), FerretError>;
    /// Destroys the native engine. Every voice must be gone.
    fn destroy_engine(&mut self);
    /// Returns `true` if the engine hit a critical error.
    fn is_engine_lost(&self) -> bool;
    /// Creates a source voice for `desc`.
    fn create_voice(
        &mut self,
        desc: &SoundDesc,
        callback: VoiceCallback,
    ) -> Result<Box<dyn NativeVoice>, FerretError>;
}

/// Something that plays on an [`AudioDevice`].
pub trait Playable {
    /// Returns `true` while playing (not paused, not finished).
    fn is_playing(&self) -> bool;
    /// Stops playback.
    fn stop(&self);
    /// Pauses playback if playing.
    fn pause(&self);
    /// Resumes playback if paused.
    fn resume(&self);
}

#[derive(Default)]
struct VoiceSlot {
    voice: Option<Box<dyn NativeVoice>>,
    serial: u64,
}

trait Voiced {
    fn slot(&mut self) -> &mut VoiceSlot;

    /// Gives up the native voice ahead of an engine teardown.
    fn release_voice(&mut self) -> Option<Box<dyn NativeVoice>> {
        let mut voice = self.slot().voice.take()?;
        voice.stop();
        Some(voice)
    }

    /// Requeues audio on the rebuilt voice, starting it if `start`.
    fn restore(&mut self, start: bool) -> Result<(), FerretError>;
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Suspended {
    playing: HashSet<EffectId>,
    paused: HashSet<EffectId>,
}

struct AudioInner {
    name: String,
    backend: RefCell<Box<dyn AudioBackend>>,
    state: Cell<DeviceState>,
    generation: Cell<u64>,
    children: ChildRegistry,
    voiced: RefCell<HashMap<EffectId, Weak<RefCell<dyn Voiced>>>>,
    playing: RefCell<HashSet<EffectId>>,
    paused: RefCell<HashSet<EffectId>>,
    /// Playback interrupted by a reset that has not succeeded yet.
    suspended: RefCell<Suspended>,
    events_tx: Sender<VoiceEvent>,
    events_rx: Receiver<VoiceEvent>,
    graveyard: DeferredDrop,
    next_effect: Cell<u64>,
    next_serial: Cell<u64>,
}

impl Drop for AudioInner {
    fn drop(&mut self) {
        self.graveyard.drain();
        if self.state.get() != DeviceState::Destroyed {
            self.backend.get_mut().destroy_engine();
        }
    }
}

/// An audio device with a stable identity across engine loss.
///
/// Cloning yields another handle to the same device.
#[derive(Clone)]
pub struct AudioDevice {
    inner: Rc<AudioInner>,
}

impl AudioDevice {
    /// Creates the device and its native engine.
    pub fn new(
        name: impl Into<String>,
        mut backend: Box<dyn AudioBackend>,
    ) -> Result<Self, FerretError> {
        let name = name.into();
        backend.create_engine()?;
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        log::info!("Audio device '{name}' created.");
        Ok(Self {
            inner: Rc::new(AudioInner {
                name,
                backend: RefCell::new(backend),
                state: Cell::new(DeviceState::Valid),
                generation: Cell::new(1),
                children: ChildRegistry::new(),
                voiced: RefCell::new(HashMap::new()),
                playing: RefCell::new(HashSet::new()),
                paused: RefCell::new(HashSet::new()),
                suspended: RefCell::new(Suspended::default()),
                events_tx,
                events_rx,
                graveyard: DeferredDrop::new(),
                next_effect: Cell::new(0),
                next_serial: Cell::new(0),
            }),
        })
    }

    /// The device name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The current lifecycle state.
    pub fn state(&self) -> DeviceState {
        self.inner.state.get()
    }

    /// Returns `true` if the engine is usable.
    pub fn is_valid(&self) -> bool {
        self.state() == DeviceState::Valid
    }

    /// Incremented every time the engine is recreated.
    pub fn generation(&self) -> u64 {
        self.inner.generation.get()
    }

    /// Number of registered effects and streams.
    pub fn child_count(&self) -> usize {
        self.inner.children.len()
    }

    /// Number of children currently playing.
    pub fn playing_count(&self) -> usize {
        self.inner.playing.borrow().len()
    }

    /// Number of children currently paused.
    pub fn paused_count(&self) -> usize {
        self.inner.paused.borrow().len()
    }

    /// Returns `true` if both handles refer to the same device.
    pub fn same_device(&self, other: &AudioDevice) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Asks the backend whether the engine was lost.
    pub fn check_device(&self) -> DeviceState {
        if self.is_valid() && self.inner.backend.borrow().is_engine_lost() {
            self.mark_lost();
        }
        self.state()
    }

    /// Records that the engine is gone.
    pub fn mark_lost(&self) {
        if self.is_valid() {
            log::warn!("Audio device '{}' lost.", self.inner.name);
            self.inner.state.set(DeviceState::Lost);
        }
    }

    /// Recreates the engine and resets every live child.
    ///
    /// Every voice is released before the engine is destroyed. Children that
    /// were playing restart from the beginning and paused children stay
    /// paused. If the engine cannot be recreated, that playback state is kept
    /// for the next successful reset.
    ///
    /// ## Returns
    /// The number of children that failed to reset.
    pub fn reset(&self) -> Result<usize, FerretError> {
        if self.state() == DeviceState::Destroyed {
            return Err(FerretError::DeviceDestroyed(self.inner.name.clone()));
        }

        {
            let mut suspended = self.inner.suspended.borrow_mut();
            suspended.playing.extend(self.inner.playing.borrow_mut().drain());
            suspended.paused.extend(self.inner.paused.borrow_mut().drain());
        }
        // Voices of the old engine go before the engine itself.
        self.release_native();
        self.inner.graveyard.drain();
        {
            let mut backend = self.inner.backend.borrow_mut();
            backend.destroy_engine();
            if let Err(e) = backend.create_engine() {
                self.inner.state.set(DeviceState::Lost);
                log::error!("Audio device '{}' could not be recreated: {e}", self.inner.name);
                return Err(e);
            }
        }
        self.inner.generation.set(self.generation() + 1);
        self.inner.state.set(DeviceState::Valid);

        let failures = self.inner.children.reset_all();
        let resumed = self.restore_playback();
        log::info!(
            "Audio device '{}' reset ({} children, {} failed, {} resumed).",
            self.inner.name,
            self.child_count(),
            failures,
            resumed
        );
        Ok(failures)
    }

    /// Releases the engine for good.
    pub fn destroy(&self) {
        if self.state() == DeviceState::Destroyed {
            return;
        }
        self.stop_effects();
        *self.inner.suspended.borrow_mut() = Suspended::default();
        self.release_native();
        self.inner.graveyard.drain();
        self.inner.backend.borrow_mut().destroy_engine();
        self.inner.state.set(DeviceState::Destroyed);
        log::info!("Audio device '{}' destroyed.", self.inner.name);
    }

    /// Pauses every playing child, including playback waiting for a reset.
    ///
    /// ## Returns
    /// How many children were paused by this call.
    pub fn pause_effects(&self) -> usize {
        {
            let mut suspended = self.inner.suspended.borrow_mut();
            let Suspended { playing, paused } = &mut *suspended;
            paused.extend(playing.drain());
        }
        let ids: Vec<EffectId> = self.inner.playing.borrow().iter().copied().collect();
        ids.into_iter().filter(|id| self.pause_one(*id)).count()
    }

    /// Resumes every paused child.
    ///
    /// ## Returns
    /// How many children were resumed by this call.
    pub fn resume_effects(&self) -> usize {
        {
            let mut suspended = self.inner.suspended.borrow_mut();
            let Suspended { playing, paused } = &mut *suspended;
            playing.extend(paused.drain());
        }
        let ids: Vec<EffectId> = self.inner.paused.borrow().iter().copied().collect();
        ids.into_iter().filter(|id| self.resume_one(*id)).count()
    }

    /// Stops every playing or paused child.
    pub fn stop_effects(&self) {
        let ids: Vec<EffectId> = {
            let playing = self.inner.playing.borrow();
            let paused = self.inner.paused.borrow();
            playing.iter().chain(paused.iter()).copied().collect()
        };
        for id in ids {
            self.stop_one(id);
        }
    }

    /// Handles the buffer-end reports received from voice callbacks.
    ///
    /// Each finished child stops playing and its voice is queued for release;
    /// see [`release_voices`](Self::release_voices).
    ///
    /// ## Returns
    /// The number of voices that finished.
    pub fn process_events(&self) -> usize {
        let mut finished = 0;
        while let Ok(event) = self.inner.events_rx.try_recv() {
            let VoiceEvent::BufferEnd { effect, serial } = event;
            let owner = self.inner.voiced.borrow().get(&effect).and_then(|w| w.upgrade());
            let Some(owner) = owner else {
                continue;
            };
            let voice = match owner.try_borrow_mut() {
                Ok(mut owner) => {
                    let slot = owner.slot();
                    if slot.serial == serial {
                        slot.voice.take()
                    } else {
                        None
                    }
                }
                Err(_) => {
                    log::warn!("Effect {} busy during buffer end, ignoring.", effect.0);
                    None
                }
            };
            if let Some(voice) = voice {
                self.forget(effect);
                self.inner.graveyard.handle().defer(voice);
                finished += 1;
            }
        }
        finished
    }

    /// Destroys finished voices on the calling thread.
    pub fn release_voices(&self) -> usize {
        self.inner.graveyard.drain()
    }

    /// Destroys finished voices on a pool worker.
    pub fn release_voices_on(&self, pool: &ThreadPool) -> Option<WorkId> {
        self.inner.graveyard.drain_on(pool)
    }

    /// Number of finished voices waiting for release.
    pub fn pending_releases(&self) -> usize {
        self.inner.graveyard.pending()
    }

    /// Drops the native voice of every child.
    fn release_native(&self) -> usize {
        let owners: Vec<Rc<RefCell<dyn Voiced>>> = self
            .inner
            .voiced
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        let mut released = 0;
        for owner in owners {
            match owner.try_borrow_mut() {
                Ok(mut owner) => {
                    if owner.release_voice().is_some() {
                        released += 1;
                    }
                }
                Err(_) => log::error!("An effect is in use while its voice is released."),
            }
        }
        released
    }

    /// Brings back the playback state saved by [`reset`](Self::reset).
    fn restore_playback(&self) -> usize {
        let Suspended { playing, paused } = std::mem::take(&mut *self.inner.suspended.borrow_mut());
        let mut resumed = 0;
        for (id, start) in playing
            .into_iter()
            .map(|id| (id, true))
            .chain(paused.into_iter().map(|id| (id, false)))
        {
            let owner = self.inner.voiced.borrow().get(&id).and_then(Weak::upgrade);
            let Some(owner) = owner else {
                continue;
            };
            let restored = match owner.try_borrow_mut() {
                Ok(mut owner) => owner.restore(start),
                Err(_) => Err(FerretError::Backend("effect in use".into())),
            };
            match restored {
                Ok(()) if start => {
                    self.set_playing(id);
                    resumed += 1;
                }
                Ok(()) => {
                    self.inner.paused.borrow_mut().insert(id);
                }
                Err(e) => log::warn!("Effect {} did not survive the reset: {e}", id.0),
            }
        }
        resumed
    }

    fn ensure_valid(&self) -> Result<(), FerretError> {
        match self.state() {
            DeviceState::Valid => Ok(()),
            DeviceState::Lost => Err(FerretError::DeviceLost(self.inner.name.clone())),
            DeviceState::Destroyed => Err(FerretError::DeviceDestroyed(self.inner.name.clone())),
        }
    }

    fn next_effect_id(&self) -> EffectId {
        let id = self.inner.next_effect.get();
        self.inner.next_effect.set(id + 1);
        EffectId(id)
    }

    fn track(&self, id: EffectId, owner: Weak<RefCell<dyn Voiced>>) {
        self.inner.voiced.borrow_mut().insert(id, owner);
    }

    fn untrack(&self, id: EffectId) {
        self.inner.voiced.borrow_mut().remove(&id);
        self.forget(id);
    }

    fn create_voice(
        &self,
        effect: EffectId,
        desc: &SoundDesc,
    ) -> Result<(u64, Box<dyn NativeVoice>), FerretError> {
        self.ensure_valid()?;
        let serial = self.inner.next_serial.get() + 1;
        self.inner.next_serial.set(serial);
        let callback = VoiceCallback {
            sender: self.inner.events_tx.clone(),
            effect,
            serial,
        };
        let voice = self.inner.backend.borrow_mut().create_voice(desc, callback)?;
        Ok((serial, voice))
    }

    fn is_playing(&self, id: EffectId) -> bool {
        self.inner.playing.borrow().contains(&id)
    }

    fn set_playing(&self, id: EffectId) {
        self.inner.paused.borrow_mut().remove(&id);
        self.inner.playing.borrow_mut().insert(id);
    }

    fn forget(&self, id: EffectId) {
        self.inner.playing.borrow_mut().remove(&id);
        self.inner.paused.borrow_mut().remove(&id);
        let mut suspended = self.inner.suspended.borrow_mut();
        suspended.playing.remove(&id);
        suspended.paused.remove(&id);
    }

    fn with_voice(&self, id: EffectId, f: impl FnOnce(&mut dyn NativeVoice)) -> bool {
        let owner = self.inner.voiced.borrow().get(&id).and_then(|w| w.upgrade());
        let Some(owner) = owner else {
            return false;
        };
        let Ok(mut owner) = owner.try_borrow_mut() else {
            log::warn!("Effect {} is busy, skipping voice call.", id.0);
            return false;
        };
        match owner.slot().voice.as_mut() {
            Some(voice) => {
                f(voice.as_mut());
                true
            }
            None => false,
        }
    }

    fn pause_one(&self, id: EffectId) -> bool {
        if !self.is_playing(id) {
            return false;
        }
        self.with_voice(id, |voice| voice.stop());
        self.inner.playing.borrow_mut().remove(&id);
        self.inner.paused.borrow_mut().insert(id);
        true
    }

    fn resume_one(&self, id: EffectId) -> bool {
        if !self.inner.paused.borrow().contains(&id) {
            return false;
        }
        let mut started = false;
        self.with_voice(id, |voice| match voice.start() {
            Ok(()) => started = true,
            Err(e) => log::warn!("Failed to resume effect {}: {e}", id.0),
        });
        if started {
            self.set_playing(id);
        } else {
            self.forget(id);
        }
        started
    }

    fn stop_one(&self, id: EffectId) {
        self.with_voice(id, |voice| voice.stop());
        self.forget(id);
    }
}

impl std::fmt::Debug for AudioDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioDevice")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("playing", &self.playing_count())
            .field("paused", &self.paused_count())
            .finish()
    }
}

/// Registers a new child with both the reset registry and the voice table.
fn attach<T>(device: &AudioDevice, id: EffectId, state: &Rc<RefCell<T>>) -> ChildRegistration
where
    T: DeviceChild + Voiced + 'static,
{
    let voiced: Rc<RefCell<dyn Voiced>> = state.clone();
    device.track(id, Rc::downgrade(&voiced));
    let child: Rc<RefCell<dyn DeviceChild>> = state.clone();
    device.inner.children.register(&child)
}

struct EffectState {
    id: EffectId,
    device: AudioDevice,
    desc: SoundDesc,
    slot: VoiceSlot,
    generation: u64,
}

impl EffectState {
    fn rebuild(&mut self) -> Result<(), FerretError> {
        self.slot.voice = None;
        let (serial, mut voice) = self.device.create_voice(self.id, &self.desc)?;
        voice.submit(&self.desc.samples)?;
        self.slot = VoiceSlot {
            voice: Some(voice),
            serial,
        };
        self.generation = self.device.generation();
        Ok(())
    }
}

impl DeviceChild for EffectState {
    fn reset(&mut self) -> Result<(), FerretError> {
        self.rebuild()
    }

    fn is_valid(&self) -> bool {
        self.generation == self.device.generation() && self.device.is_valid()
    }

    fn label(&self) -> &str {
        &self.desc.label
    }
}

impl Voiced for EffectState {
    fn slot(&mut self) -> &mut VoiceSlot {
        &mut self.slot
    }

    fn restore(&mut self, start: bool) -> Result<(), FerretError> {
        let voice = self.slot.voice.as_mut().ok_or_else(|| {
            FerretError::Backend(format!("'{}' has no voice", self.desc.label))
        })?;
        if start {
            voice.start()?;
        }
        Ok(())
    }
}

/// A fully loaded sound that can be fired repeatedly.
pub struct SoundEffect {
    id: EffectId,
    device: AudioDevice,
    state: Rc<RefCell<EffectState>>,
    _registration: ChildRegistration,
}

impl SoundEffect {
    /// Creates the effect and its voice on `device`.
    pub fn new(device: &AudioDevice, desc: SoundDesc) -> Result<Self, FerretError> {
        let id = device.next_effect_id();
        let mut state = EffectState {
            id,
            device: device.clone(),
            desc,
            slot: VoiceSlot::default(),
            generation: 0,
        };
        state.rebuild()?;
        let state = Rc::new(RefCell::new(state));
        let registration = attach(device, id, &state);
        Ok(Self {
            id,
            device: device.clone(),
            state,
            _registration: registration,
        })
    }

    /// The effect id.
    pub fn id(&self) -> EffectId {
        self.id
    }

    /// Returns `true` if the effect belongs to the current engine.
    pub fn is_valid(&self) -> bool {
        self.state.borrow().is_valid()
    }

    /// Plays the sound from the start.
    pub fn play(&self) -> Result<(), FerretError> {
        self.device.ensure_valid()?;
        {
            let mut state = self.state.borrow_mut();
            let state = &mut *state;
            let stale = state.generation != self.device.generation();
            match state.slot.voice.as_mut() {
                Some(voice) if !stale => {
                    voice.stop();
                    voice.flush();
                    voice.submit(&state.desc.samples)?;
                }
                _ => state.rebuild()?,
            }
            if let Some(voice) = state.slot.voice.as_mut() {
                voice.start()?;
            }
        }
        self.device.set_playing(self.id);
        Ok(())
    }
}

impl Playable for SoundEffect {
    fn is_playing(&self) -> bool {
        self.device.is_playing(self.id)
    }

    fn stop(&self) {
        self.device.stop_one(self.id);
    }

    fn pause(&self) {
        self.device.pause_one(self.id);
    }

    fn resume(&self) {
        self.device.resume_one(self.id);
    }
}

impl Drop for SoundEffect {
    fn drop(&mut self) {
        self.device.untrack(self.id);
    }
}

impl std::fmt::Debug for SoundEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundEffect")
            .field("id", &self.id)
            .field("playing", &self.is_playing())
            .finish()
    }
}

/// Decoded audio pulled in chunks by a [`MusicStream`].
pub trait MusicSource: Send {
    /// Returns to the start of the track.
    fn rewind(&mut self);
    /// The next chunk of interleaved samples, or `None` at the end.
    fn next_chunk(&mut self) -> Option<Vec<f32>>;
}

struct MusicState {
    id: EffectId,
    device: AudioDevice,
    desc: SoundDesc,
    source: Arc<Mutex<Box<dyn MusicSource>>>,
    buffered: Arc<Mutex<Vec<Vec<f32>>>>,
    prebuffer_chunks: usize,
    prebuffer: Option<CancelableTask>,
    slot: VoiceSlot,
    generation: u64,
}

impl MusicState {
    fn cancel_async(&mut self) {
        if let Some(mut task) = self.prebuffer.take() {
            task.cancel_and_wait();
        }
    }

    fn start_prebuffer(&mut self) -> Result<(), FerretError> {
        self.cancel_async();
        guard(&self.buffered).clear();

        let source = Arc::clone(&self.source);
        let buffered = Arc::clone(&self.buffered);
        let chunks = self.prebuffer_chunks;
        let task = CancelableTask::spawn(format!("music-prebuffer-{}", self.id.0), move |token| {
            let mut source = guard(&source);
            source.rewind();
            for _ in 0..chunks {
                if token.is_cancelled() {
                    break;
                }
                match source.next_chunk() {
                    Some(chunk) => guard(&buffered).push(chunk),
                    None => break,
                }
            }
        })
        .map_err(|e| FerretError::Backend(format!("cannot start music prebuffer: {e}")))?;
        self.prebuffer = Some(task);
        Ok(())
    }

    fn rebuild(&mut self) -> Result<(), FerretError> {
        self.cancel_async();
        self.slot.voice = None;
        let (serial, voice) = self.device.create_voice(self.id, &self.desc)?;
        self.slot = VoiceSlot {
            voice: Some(voice),
            serial,
        };
        self.generation = self.device.generation();
        self.start_prebuffer()
    }

    fn submit_buffered(&mut self) -> Result<usize, FerretError> {
        if let Some(task) = self.prebuffer.as_mut() {
            task.wait();
        }
        let chunks: Vec<Vec<f32>> = guard(&self.buffered).drain(..).collect();
        if let Some(voice) = self.slot.voice.as_mut() {
            for chunk in &chunks {
                voice.submit(chunk)?;
            }
        }
        Ok(chunks.len())
    }
}

impl DeviceChild for MusicState {
    fn reset(&mut self) -> Result<(), FerretError> {
        self.rebuild()
    }

    fn is_valid(&self) -> bool {
        self.generation == self.device.generation() && self.device.is_valid()
    }

    fn label(&self) -> &str {
        &self.desc.label
    }
}

impl Voiced for MusicState {
    fn slot(&mut self) -> &mut VoiceSlot {
        &mut self.slot
    }

    fn release_voice(&mut self) -> Option<Box<dyn NativeVoice>> {
        self.cancel_async();
        let mut voice = self.slot.voice.take()?;
        voice.stop();
        Some(voice)
    }

    fn restore(&mut self, start: bool) -> Result<(), FerretError> {
        if self.slot.voice.is_none() {
            return Err(FerretError::Backend(format!("'{}' has no voice", self.desc.label)));
        }
        self.submit_buffered()?;
        if let (true, Some(voice)) = (start, self.slot.voice.as_mut()) {
            voice.start()?;
        }
        Ok(())
    }
}

impl Drop for MusicState {
    fn drop(&mut self) {
        self.cancel_async();
    }
}

/// Music decoded ahead of playback on a background thread.
pub struct MusicStream {
    id: EffectId,
    device: AudioDevice,
    state: Rc<RefCell<MusicState>>,
    _registration: ChildRegistration,
}

impl MusicStream {
    /// Creates the stream and starts prebuffering `prebuffer_chunks` chunks.
    pub fn new(
        device: &AudioDevice,
        desc: SoundDesc,
        source: Box<dyn MusicSource>,
        prebuffer_chunks: usize,
    ) -> Result<Self, FerretError> {
        let id = device.next_effect_id();
        let mut state = MusicState {
            id,
            device: device.clone(),
            desc,
            source: Arc::new(Mutex::new(source)),
            buffered: Arc::new(Mutex::new(Vec::new())),
            prebuffer_chunks: prebuffer_chunks.max(1),
            prebuffer: None,
            slot: VoiceSlot::default(),
            generation: 0,
        };
        state.rebuild()?;
        let state = Rc::new(RefCell::new(state));
        let registration = attach(device, id, &state);
        Ok(Self {
            id,
            device: device.clone(),
            state,
            _registration: registration,
        })
    }

    /// The stream id.
    pub fn id(&self) -> EffectId {
        self.id
    }

    /// Returns `true` if the stream belongs to the current engine.
    pub fn is_valid(&self) -> bool {
        self.state.borrow().is_valid()
    }

    /// Returns `true` once the prebuffer thread is done.
    pub fn is_prebuffered(&self) -> bool {
        self.state
            .borrow()
            .prebuffer
            .as_ref()
            .map_or(true, CancelableTask::is_finished)
    }

    /// Stops the prebuffer thread and waits for it.
    pub fn cancel_async(&self) {
        self.state.borrow_mut().cancel_async();
    }

    /// Waits for the prebuffer, queues it and starts playback.
    ///
    /// ## Returns
    /// The number of chunks queued.
    pub fn play(&self) -> Result<usize, FerretError> {
        self.device.ensure_valid()?;
        let queued = {
            let mut state = self.state.borrow_mut();
            if state.slot.voice.is_none() || state.generation != self.device.generation() {
                state.rebuild()?;
            }
            let queued = state.submit_buffered()?;
            if let Some(voice) = state.slot.voice.as_mut() {
                voice.start()?;
            }
            queued
        };
        self.device.set_playing(self.id);
        Ok(queued)
    }
}

impl Playable for MusicStream {
    fn is_playing(&self) -> bool {
        self.device.is_playing(self.id)
    }

    fn stop(&self) {
        self.device.stop_one(self.id);
    }

    fn pause(&self) {
        self.device.pause_one(self.id);
    }

    fn resume(&self) {
        self.device.resume_one(self.id);
    }
}

impl Drop for MusicStream {
    fn drop(&mut self) {
        self.cancel_async();
        self.device.untrack(self.id);
    }
}

impl std::fmt::Debug for MusicStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicStream")
            .field("id", &self.id)
            .field("playing", &self.is_playing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{HeadlessAudioBackend, HeadlessControl};
    use ferret_core::MessageQueue;
    use ferret_threading::PoolConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn device() -> (AudioDevice, HeadlessControl) {
        let (backend, control) = HeadlessAudioBackend::new();
        (AudioDevice::new("test", Box::new(backend)).unwrap(), control)
    }

    fn beep(device: &AudioDevice) -> SoundEffect {
        let mut desc = SoundDesc::format("beep", 1, 22_050);
        desc.samples = Arc::from(vec![0.0_f32; 64]);
        SoundEffect::new(device, desc).unwrap()
    }

    struct Counting {
        position: usize,
        total: usize,
    }

    impl MusicSource for Counting {
        fn rewind(&mut self) {
            self.position = 0;
        }
        fn next_chunk(&mut self) -> Option<Vec<f32>> {
            (self.position < self.total).then(|| {
                self.position += 1;
                vec![0.5; 16]
            })
        }
    }

    #[test]
    fn pause_and_resume_are_idempotent() {
        let (device, control) = device();
        let a = beep(&device);
        let b = beep(&device);
        a.play().unwrap();
        b.play().unwrap();
        assert_eq!(control.playing_voices(), 2);

        assert_eq!(device.pause_effects(), 2);
        assert_eq!(device.pause_effects(), 0);
        assert_eq!((device.playing_count(), device.paused_count()), (0, 2));
        assert_eq!(control.playing_voices(), 0);

        assert_eq!(device.resume_effects(), 2);
        assert_eq!(device.resume_effects(), 0);
        assert!(a.is_playing() && b.is_playing());
        assert_eq!(control.playing_voices(), 2);
    }

    #[test]
    fn buffer_end_releases_voice_off_the_callback_thread() {
        let (device, control) = device();
        let effect = beep(&device);
        effect.play().unwrap();
        let voices_before = control.live_handles();

        let callback_control = control.clone();
        thread::spawn(move || callback_control.finish_playing())
            .join()
            .unwrap();

        // Nothing happens until the main thread looks at the events.
        assert!(effect.is_playing());
        assert_eq!(control.live_handles(), voices_before);

        assert_eq!(device.process_events(), 1);
        assert!(!effect.is_playing());
        assert_eq!(device.pending_releases(), 1);
        assert_eq!(device.release_voices(), 1);
        assert_eq!(control.live_handles(), voices_before - 1);

        // Playing again builds a fresh voice.
        effect.play().unwrap();
        assert!(effect.is_playing());
        assert_eq!(control.live_handles(), voices_before);
    }

    #[test]
    fn finished_voices_can_be_released_on_the_pool() {
        let (device, control) = device();
        let effect = beep(&device);
        effect.play().unwrap();
        control.finish_playing();
        device.process_events();

        let pool = ThreadPool::new(Rc::new(MessageQueue::new()), PoolConfig::for_cpus(1));
        let id = device.release_voices_on(&pool).unwrap();
        pool.wait(id);
        assert_eq!(device.pending_releases(), 0);
        assert_eq!(control.playing_voices(), 0);
    }

    #[test]
    fn stale_buffer_end_is_ignored() {
        let (device, control) = device();
        let effect = beep(&device);
        effect.play().unwrap();
        control.finish_playing();

        // The effect is reset before the report is processed.
        device.reset().unwrap();
        effect.play().unwrap();
        assert_eq!(device.process_events(), 0);
        assert!(effect.is_playing());
    }

    fn theme(device: &AudioDevice) -> MusicStream {
        MusicStream::new(
            device,
            SoundDesc::format("theme", 2, 44_100),
            Box::new(Counting {
                position: 0,
                total: 8,
            }),
            4,
        )
        .unwrap()
    }

    #[test]
    fn reset_rebuilds_children_and_resumes_playback() {
        let (device, control) = device();
        let effect = beep(&device);
        let music = theme(&device);
        effect.play().unwrap();
        assert_eq!(music.play().unwrap(), 4);

        control.lose_device();
        assert_eq!(device.check_device(), DeviceState::Lost);
        assert!(!effect.is_valid() && !music.is_valid());
        assert!(matches!(effect.play(), Err(FerretError::DeviceLost(_))));

        assert_eq!(device.reset().unwrap(), 0);
        assert!(effect.is_valid() && music.is_valid());
        assert!(effect.is_playing() && music.is_playing());
        assert_eq!(device.playing_count(), 2);
        assert_eq!(control.playing_voices(), 2);
        // The beep is requeued whole and the music prebuffer restarts from the top.
        assert_eq!(control.queued_samples(), 64 + 4 * 16);
    }

    #[test]
    fn paused_children_stay_paused_across_reset() {
        let (device, control) = device();
        let effect = beep(&device);
        let music = theme(&device);
        effect.play().unwrap();
        music.play().unwrap();
        music.pause();

        device.mark_lost();
        device.reset().unwrap();
        assert!(effect.is_playing());
        assert!(!music.is_playing());
        assert_eq!(device.paused_count(), 1);
        assert_eq!(control.playing_voices(), 1);

        assert_eq!(device.resume_effects(), 1);
        assert!(music.is_playing());
        assert_eq!(control.playing_voices(), 2);
    }

    #[test]
    fn failed_reset_keeps_playback_for_the_next_attempt() {
        let (device, control) = device();
        let effect = beep(&device);
        let stopped = beep(&device);
        effect.play().unwrap();
        stopped.play().unwrap();

        control.lose_device();
        control.fail_next_create();
        assert!(device.reset().is_err());
        assert_eq!(device.state(), DeviceState::Lost);
        assert!(!effect.is_playing());
        // Stopping while lost is remembered.
        stopped.stop();

        assert_eq!(device.reset().unwrap(), 0);
        assert!(effect.is_playing());
        assert!(!stopped.is_playing());
        assert_eq!(control.playing_voices(), 1);
    }

    /// Counts live voices and records how many were alive at engine teardown.
    struct Tracking {
        live: Arc<AtomicUsize>,
        alive_at_destroy: Rc<RefCell<Vec<usize>>>,
    }

    struct TrackedVoice(Arc<AtomicUsize>);

    impl NativeVoice for TrackedVoice {
        fn start(&mut self) -> Result<(), FerretError> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn submit(&mut self, _samples: &[f32]) -> Result<(), FerretError> {
            Ok(())
        }
        fn flush(&mut self) {}
    }

    impl Drop for TrackedVoice {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl AudioBackend for Tracking {
        fn create_engine(&mut self) -> Result<(), FerretError> {
            Ok(())
        }
        fn destroy_engine(&mut self) {
            self.alive_at_destroy
                .borrow_mut()
                .push(self.live.load(Ordering::SeqCst));
        }
        fn is_engine_lost(&self) -> bool {
            false
        }
        fn create_voice(
            &mut self,
            _desc: &SoundDesc,
            _callback: VoiceCallback,
        ) -> Result<Box<dyn NativeVoice>, FerretError> {
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(TrackedVoice(Arc::clone(&self.live))))
        }
    }

    #[test]
    fn voices_are_gone_before_the_engine_is_destroyed() {
        let live = Arc::new(AtomicUsize::new(0));
        let alive_at_destroy = Rc::new(RefCell::new(Vec::new()));
        let device = AudioDevice::new(
            "tracked",
            Box::new(Tracking {
                live: Arc::clone(&live),
                alive_at_destroy: Rc::clone(&alive_at_destroy),
            }),
        )
        .unwrap();
        let effect = beep(&device);
        let music = theme(&device);
        effect.play().unwrap();
        music.play().unwrap();
        assert_eq!(live.load(Ordering::SeqCst), 2);

        device.mark_lost();
        device.reset().unwrap();
        assert_eq!(*alive_at_destroy.borrow(), vec![0]);
        assert_eq!(live.load(Ordering::SeqCst), 2);

        device.destroy();
        assert_eq!(*alive_at_destroy.borrow(), vec![0, 0]);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_async_stops_prebuffering() {
        struct Endless;
        impl MusicSource for Endless {
            fn rewind(&mut self) {}
            fn next_chunk(&mut self) -> Option<Vec<f32>> {
                thread::sleep(std::time::Duration::from_millis(1));
                Some(vec![0.0; 4])
            }
        }

        let (device, _control) = device();
        let music = MusicStream::new(
            &device,
            SoundDesc::format("endless", 2, 44_100),
            Box::new(Endless),
            usize::MAX,
        )
        .unwrap();
        music.cancel_async();
        assert!(music.is_prebuffered());
    }

    #[test]
    fn dropping_children_untracks_them() {
        let (device, control) = device();
        let effect = beep(&device);
        effect.play().unwrap();
        assert_eq!(device.child_count(), 1);
        drop(effect);
        assert_eq!(device.child_count(), 0);
        assert_eq!(device.playing_count(), 0);
        assert_eq!(control.playing_voices(), 0);
    }

    #[test]
    fn destroy_stops_everything() {
        let (device, _control) = device();
        let effect = beep(&device);
        effect.play().unwrap();
        device.destroy();
        assert!(!effect.is_playing());
        assert!(matches!(effect.play(), Err(FerretError::DeviceDestroyed(_))));
        assert!(matches!(device.reset(), Err(FerretError::DeviceDestroyed(_))));
    }
}
