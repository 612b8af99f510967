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

//! A console "window" that owns headless devices and survives device loss.

use anyhow::Result;
use ferret_app::AppWindow;
use ferret_core::{FerretError, GlobalTime, MainSender, WindowEvent, WindowId};
use ferret_device::headless::{HeadlessAudioBackend, HeadlessControl, HeadlessGraphBackend};
use ferret_device::{
    AudioDevice, DeviceState, GraphDevice, MusicSource, MusicStream, Playable, RenderTarget,
    RenderTargetDesc, SoundDesc, SoundEffect, Texture, TextureDesc,
};
use ferret_threading::{CommandGroups, GroupId};
use std::sync::Arc;
use std::thread;

/// Command group refreshed whenever a device comes back.
pub const DEVICE_GROUP: GroupId = GroupId(1);

const BEEP_EVERY: u64 = 30;
const VOICE_CALLBACK_EVERY: u64 = 45;

/// A looping sine tone split in fixed chunks.
struct Tone {
    position: usize,
    chunks: usize,
}

impl MusicSource for Tone {
    fn rewind(&mut self) {
        self.position = 0;
    }

    fn next_chunk(&mut self) -> Option<Vec<f32>> {
        if self.position >= self.chunks {
            return None;
        }
        let start = self.position * 256;
        self.position += 1;
        Some(
            (start..start + 256)
                .map(|i| (i as f32 * 0.05).sin() * 0.25)
                .collect(),
        )
    }
}

struct Audio {
    device: AudioDevice,
    control: HeadlessControl,
    beep: SoundEffect,
    music: MusicStream,
}

impl Audio {
    fn new() -> Result<Self, FerretError> {
        let (backend, control) = HeadlessAudioBackend::new();
        let device = AudioDevice::new("player audio", Box::new(backend))?;
        let mut beep = SoundDesc::format("beep", 1, 22_050);
        beep.samples = (0..2_205).map(|i| (i as f32 * 0.2).sin()).collect();
        let beep = SoundEffect::new(&device, beep)?;
        let music = MusicStream::new(
            &device,
            SoundDesc::format("theme", 2, 44_100),
            Box::new(Tone {
                position: 0,
                chunks: 64,
            }),
            8,
        )?;
        Ok(Self {
            device,
            control,
            beep,
            music,
        })
    }
}

/// Settings of the demo run.
#[derive(Debug, Clone, Copy)]
pub struct Script {
    /// Advance on which both devices are lost.
    pub lose_devices_at: u64,
    /// Advance after which the player quits.
    pub quit_after: u64,
}

/// The demo window.
pub struct PlayerWindow {
    id: WindowId,
    sender: MainSender,
    commands: Arc<CommandGroups>,
    graph: GraphDevice,
    graph_control: HeadlessControl,
    _sprite: Texture,
    _target: RenderTarget,
    audio: Option<Audio>,
    script: Script,
    advances: u64,
    active: bool,
}

impl PlayerWindow {
    /// Creates the window and its devices.
    pub fn new(
        sender: MainSender,
        commands: Arc<CommandGroups>,
        sound: bool,
        buffers: u8,
        script: Script,
    ) -> Result<Self> {
        let (backend, graph_control) = HeadlessGraphBackend::new();
        let graph = GraphDevice::new("player graphics", Box::new(backend))?;
        let sprite = Texture::new(
            &graph,
            TextureDesc {
                label: "sprite".into(),
                width: 64,
                height: 64,
            },
        )?;
        let target = RenderTarget::new(
            &graph,
            RenderTargetDesc {
                label: "back buffer".into(),
                width: 1280,
                height: 720,
                buffers: u32::from(buffers),
            },
        )?;

        let audio = if sound {
            let audio = Audio::new()?;
            audio.music.play()?;
            Some(audio)
        } else {
            None
        };

        Ok(Self {
            id: WindowId(1),
            sender,
            commands,
            graph,
            graph_control,
            _sprite: sprite,
            _target: target,
            audio,
            script,
            advances: 0,
            active: true,
        })
    }

    fn restore_graphics(&mut self) {
        if self.graph.check_device() == DeviceState::Valid {
            return;
        }
        match self.graph.reset() {
            Ok(0) => {
                log::info!("Graphics restored ({} resources).", self.graph.child_count());
                self.commands.invalidate_group(DEVICE_GROUP);
            }
            Ok(failed) => log::warn!("Graphics restored, {failed} resources still broken."),
            Err(e) => log::warn!("Graphics reset failed, retrying next frame: {e}"),
        }
    }

    fn restore_audio(&mut self) {
        let Some(audio) = &self.audio else {
            return;
        };
        if audio.device.check_device() == DeviceState::Valid {
            return;
        }
        match audio.device.reset() {
            Ok(failed) => {
                log::info!(
                    "Audio restored, {} playing, {failed} effects broken.",
                    audio.device.playing_count()
                );
                self.commands.invalidate_group(DEVICE_GROUP);
            }
            Err(e) => log::warn!("Audio reset failed, retrying next frame: {e}"),
        }
    }
}

impl AppWindow for PlayerWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn on_event(&mut self, event: &WindowEvent) {
        if let WindowEvent::Activate(active) = *event {
            self.active = active;
            if let Some(audio) = &self.audio {
                if active {
                    audio.device.resume_effects();
                } else {
                    audio.device.pause_effects();
                }
            }
        }
    }

    fn advance(&mut self, _time: &GlobalTime) -> Result<()> {
        self.advances += 1;

        if self.advances == self.script.lose_devices_at {
            log::info!("Simulating device loss on advance {}.", self.advances);
            self.graph_control.lose_device();
            if let Some(audio) = &self.audio {
                audio.control.lose_device();
            }
        }

        if let Some(audio) = &self.audio {
            if self.active
                && self.advances % BEEP_EVERY == 0
                && audio.device.check_device() == DeviceState::Valid
            {
                audio.beep.play()?;
            }
            if self.advances % VOICE_CALLBACK_EVERY == 0 {
                // Buffer ends are reported from the voice callback thread.
                let control = audio.control.clone();
                thread::spawn(move || control.finish_playing());
            }
            let finished = audio.device.process_events();
            if finished > 0 {
                log::debug!("{finished} voices finished.");
            }
            audio.device.release_voices();
        }

        if self.advances == self.script.quit_after {
            log::info!("Script finished after {} advances.", self.advances);
            self.sender.post_quit(0);
        }
        Ok(())
    }

    fn render(&mut self, time: &GlobalTime) -> Result<()> {
        self.restore_graphics();
        self.restore_audio();
        log::trace!(
            "Render at {:.3}s (interpolation {:.2}).",
            time.absolute_seconds,
            time.bank_scale
        );
        Ok(())
    }

    fn present(&mut self, vsync: bool) -> Result<()> {
        match self.graph.present(vsync) {
            Ok(()) => Ok(()),
            // Picked up by the next render.
            Err(FerretError::DeviceLost(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn wait_vsync(&mut self) {
        self.restore_graphics();
    }
}

impl Drop for PlayerWindow {
    fn drop(&mut self) {
        if let Some(audio) = &self.audio {
            audio.music.stop();
            audio.music.cancel_async();
        }
        log::info!(
            "Window closed after {} advances, {} presents.",
            self.advances,
            self.graph_control.presents()
        );
    }
}
