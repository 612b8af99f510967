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

//! User options and their on-disk form.

use ferret_core::mru::DEFAULT_MRU_LIMIT;
use ferret_core::time::{
    DEFAULT_ADVANCES_PER_SECOND, DEFAULT_FRAMES_PER_SECOND, DEFAULT_MAX_ADVANCES,
    MAX_ADVANCES_RANGE, RATE_RANGE,
};
use ferret_core::{Dict, FerretError, MruList};
use ferret_threading::idle::{DEFAULT_IDLE_TIMEOUT, MAX_IDLE_TIMEOUT};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest accepted window padding, in pixels.
pub const MAX_PADDING: u8 = 127;
/// Accepted swap chain buffer counts.
pub const BUFFER_RANGE: RangeInclusive<u8> = 1..=4;

const KEY_SOUND: &str = "Sound";
const KEY_VSYNC: &str = "VSync";
const KEY_SHOW_FPS: &str = "ShowFps";
const KEY_PADDING: &str = "Padding";
const KEY_BUFFERS: &str = "Buffers";
const KEY_FULLSCREEN: &str = "FullScreen";
const KEY_ADVANCES: &str = "AdvancesPerSecond";
const KEY_FRAMES: &str = "FramesPerSecond";
const KEY_MAX_ADVANCES: &str = "MaxAdvances";
const KEY_IDLE_MS: &str = "IdleTimeoutMs";
const KEY_FIRST_RUN: &str = "FirstRun";

/// Application options.
///
/// `automation` only ever comes from the command line and is not persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AppOptions {
    /// Audio output enabled.
    pub sound: bool,
    /// Present on vertical sync; otherwise frames are paced by a timer.
    pub vsync: bool,
    /// Log frame rates once a second.
    pub show_fps: bool,
    /// Window padding in pixels, `0..=127`.
    pub padding: u8,
    /// Swap chain buffer count, `1..=4`.
    pub buffers: u8,
    /// Start full screen.
    pub fullscreen: bool,
    /// Running under test automation.
    pub automation: bool,
    /// The application has not completed a run yet.
    pub first_run: bool,
    /// Fixed simulation steps per second.
    pub advances_per_second: f64,
    /// Target frame rate when vsync is off.
    pub frames_per_second: f64,
    /// Cap on simulation steps per frame.
    pub max_advances: u32,
    /// Quiet period before idle work runs.
    pub idle_timeout: Duration,
    /// Recently opened documents.
    pub mru: MruList,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            sound: true,
            vsync: true,
            show_fps: false,
            padding: 0,
            buffers: 2,
            fullscreen: false,
            automation: false,
            first_run: true,
            advances_per_second: DEFAULT_ADVANCES_PER_SECOND,
            frames_per_second: DEFAULT_FRAMES_PER_SECOND,
            max_advances: DEFAULT_MAX_ADVANCES,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            mru: MruList::new(DEFAULT_MRU_LIMIT),
        }
    }
}

impl AppOptions {
    /// Default location of the options file for `app_name`:
    /// `<user data dir>/<app_name>-options-<arch>.dat`.
    pub fn default_path(app_name: &str) -> Option<PathBuf> {
        let file = format!("{app_name}-options-{}.dat", std::env::consts::ARCH);
        dirs::data_dir().map(|dir| dir.join(file))
    }

    /// Writes the options into a dictionary.
    pub fn to_dict(&self) -> Dict {
        let mut dict = Dict::new();
        dict.set(KEY_SOUND, self.sound);
        dict.set(KEY_VSYNC, self.vsync);
        dict.set(KEY_SHOW_FPS, self.show_fps);
        dict.set(KEY_PADDING, u32::from(self.padding));
        dict.set(KEY_BUFFERS, u32::from(self.buffers));
        dict.set(KEY_FULLSCREEN, self.fullscreen);
        dict.set(KEY_FIRST_RUN, self.first_run);
        dict.set(KEY_ADVANCES, self.advances_per_second);
        dict.set(KEY_FRAMES, self.frames_per_second);
        dict.set(KEY_MAX_ADVANCES, self.max_advances);
        let idle_ms = i64::try_from(self.idle_timeout.as_millis()).unwrap_or(i64::MAX);
        dict.set(KEY_IDLE_MS, idle_ms);
        self.mru.save_to(&mut dict);
        dict
    }

    /// Reads options from a dictionary.
    ///
    /// Missing keys keep their defaults; out-of-range values are logged and
    /// replaced by the default.
    pub fn from_dict(dict: &Dict) -> Self {
        let defaults = Self::default();
        let mut mru = MruList::new(DEFAULT_MRU_LIMIT);
        mru.load_from(dict);

        Self {
            sound: dict.get_bool(KEY_SOUND, defaults.sound),
            vsync: dict.get_bool(KEY_VSYNC, defaults.vsync),
            show_fps: dict.get_bool(KEY_SHOW_FPS, defaults.show_fps),
            padding: read_in_range(dict, KEY_PADDING, 0..=MAX_PADDING, defaults.padding),
            buffers: read_in_range(dict, KEY_BUFFERS, BUFFER_RANGE, defaults.buffers),
            fullscreen: dict.get_bool(KEY_FULLSCREEN, defaults.fullscreen),
            automation: false,
            first_run: dict.get_bool(KEY_FIRST_RUN, defaults.first_run),
            advances_per_second: read_rate(dict, KEY_ADVANCES, defaults.advances_per_second),
            frames_per_second: read_rate(dict, KEY_FRAMES, defaults.frames_per_second),
            max_advances: read_in_range(
                dict,
                KEY_MAX_ADVANCES,
                MAX_ADVANCES_RANGE,
                defaults.max_advances,
            ),
            idle_timeout: Duration::from_millis(read_in_range(
                dict,
                KEY_IDLE_MS,
                0..=MAX_IDLE_TIMEOUT.as_millis() as u64,
                defaults.idle_timeout.as_millis() as u64,
            )),
            mru,
        }
    }

    /// Loads options from `path`, falling back to the defaults when the file
    /// is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            log::info!("No options at '{}', using defaults.", path.display());
            return Self::default();
        }
        match Dict::load(path) {
            Ok(dict) => {
                log::info!("Loaded options from '{}'.", path.display());
                Self::from_dict(&dict)
            }
            Err(e) => {
                log::warn!("Ignoring unreadable options: {e}");
                Self::default()
            }
        }
    }

    /// Saves the options to `path`.
    pub fn save(&self, path: &Path) -> Result<(), FerretError> {
        self.to_dict().save(path)?;
        log::info!("Saved options to '{}'.", path.display());
        Ok(())
    }

    /// Restores every option to its default, keeping the MRU list.
    pub fn reset_to_defaults(&mut self) {
        let mru = std::mem::replace(&mut self.mru, MruList::new(DEFAULT_MRU_LIMIT));
        *self = Self {
            mru,
            ..Self::default()
        };
    }
}

fn read_in_range<T>(dict: &Dict, key: &str, range: RangeInclusive<T>, default: T) -> T
where
    T: TryFrom<i64> + PartialOrd + Copy,
{
    if !dict.contains(key) {
        return default;
    }
    let raw = dict.get_int(key, i64::MIN);
    match T::try_from(raw) {
        Ok(value) if range.contains(&value) => value,
        _ => {
            log::warn!("Option '{key}' has out-of-range value {raw}, using the default.");
            default
        }
    }
}

fn read_rate(dict: &Dict, key: &str, default: f64) -> f64 {
    if !dict.contains(key) {
        return default;
    }
    let raw = dict.get_float(key, f64::NAN);
    if RATE_RANGE.contains(&raw) {
        raw
    } else {
        log::warn!("Option '{key}' has out-of-range rate {raw}, using the default.");
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_round_trip_keeps_every_option() {
        let mut options = AppOptions {
            sound: false,
            vsync: false,
            show_fps: true,
            padding: 12,
            buffers: 3,
            fullscreen: true,
            first_run: false,
            advances_per_second: 120.0,
            frames_per_second: 30.0,
            max_advances: 6,
            idle_timeout: Duration::from_millis(250),
            ..AppOptions::default()
        };
        options.mru.add("a.lvl", "A", true);
        options.mru.add("b.lvl", "B", false);

        assert_eq!(AppOptions::from_dict(&options.to_dict()), options);
    }

    #[test]
    fn automation_is_never_persisted() {
        let options = AppOptions {
            automation: true,
            ..AppOptions::default()
        };
        assert!(!AppOptions::from_dict(&options.to_dict()).automation);
    }

    #[test]
    fn out_of_range_values_fall_back() {
        let mut dict = Dict::new();
        dict.set(KEY_PADDING, 500);
        dict.set(KEY_BUFFERS, 0);
        dict.set(KEY_ADVANCES, -1.0);
        dict.set(KEY_MAX_ADVANCES, 0);
        let options = AppOptions::from_dict(&dict);
        let defaults = AppOptions::default();
        assert_eq!(options.padding, defaults.padding);
        assert_eq!(options.buffers, defaults.buffers);
        assert_eq!(options.advances_per_second, defaults.advances_per_second);
        assert_eq!(options.max_advances, defaults.max_advances);
    }

    #[test]
    fn unusable_rates_and_caps_fall_back() {
        for (rate, cap) in [(1e-20, u32::MAX), (1e12, 65), (f64::INFINITY, 0)] {
            let mut dict = Dict::new();
            dict.set(KEY_FRAMES, rate);
            dict.set(KEY_ADVANCES, rate);
            dict.set(KEY_MAX_ADVANCES, cap);
            dict.set(KEY_IDLE_MS, i64::MAX);
            let options = AppOptions::from_dict(&dict);
            assert_eq!(options.frames_per_second, DEFAULT_FRAMES_PER_SECOND);
            assert_eq!(options.advances_per_second, DEFAULT_ADVANCES_PER_SECOND);
            assert_eq!(options.max_advances, DEFAULT_MAX_ADVANCES);
            assert_eq!(options.idle_timeout, DEFAULT_IDLE_TIMEOUT);
        }
    }

    #[test]
    fn rates_at_the_limits_are_kept() {
        let mut dict = Dict::new();
        dict.set(KEY_FRAMES, 1000.0);
        dict.set(KEY_ADVANCES, 1.0);
        dict.set(KEY_MAX_ADVANCES, 64);
        let options = AppOptions::from_dict(&dict);
        assert_eq!(options.frames_per_second, 1000.0);
        assert_eq!(options.advances_per_second, 1.0);
        assert_eq!(options.max_advances, 64);
    }

    #[test]
    fn default_path_names_app_and_arch() {
        if let Some(path) = AppOptions::default_path("Demo") {
            let name = path.file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("Demo-options-"));
            assert!(name.ends_with(".dat"));
        }
    }

    #[test]
    fn reset_to_defaults_keeps_mru() {
        let mut options = AppOptions {
            vsync: false,
            ..AppOptions::default()
        };
        options.mru.add("x", "X", false);
        options.reset_to_defaults();
        assert!(options.vsync);
        assert_eq!(options.mru.len(), 1);
    }
}
