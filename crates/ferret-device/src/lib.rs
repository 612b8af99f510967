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

//! # Ferret Device
//!
//! Graphics and audio devices that survive the loss of their native handle.
//!
//! A device keeps a stable identity while its native handle comes and goes.
//! Every resource created against a device registers in the device's
//! [`ChildRegistry`]; [`GraphDevice::reset`] and [`AudioDevice::reset`]
//! recreate the native handle and then reset each live child in registration
//! order. Devices and their children live on the main thread.

#![warn(missing_docs)]

pub mod audio;
pub mod graph;
pub mod headless;
pub mod registry;

pub use audio::{
    AudioBackend, AudioDevice, EffectId, MusicSource, MusicStream, NativeVoice, Playable, SoundDesc,
    SoundEffect, VoiceCallback,
};
pub use graph::{
    GraphBackend, GraphDevice, NativeHandle, RenderTarget, RenderTargetDesc, Texture, TextureDesc,
};
pub use registry::{ChildId, ChildRegistration, ChildRegistry, DeviceChild};

/// Lifecycle state shared by all devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// The native handle is usable.
    Valid,
    /// The native handle was lost; a reset is required.
    Lost,
    /// The device was destroyed and can never be used again.
    Destroyed,
}
