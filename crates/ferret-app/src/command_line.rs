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

//! Command line switches.
//!
//! Switches start with `/` or `-`, are case-insensitive and take their value
//! after a colon (`/vsync:off`). Unknown switches and bad values are logged
//! and skipped.

use crate::options::{AppOptions, BUFFER_RANGE, MAX_PADDING};

/// Help text for `/?`.
pub const USAGE: &str = "\
Options:
  /?                 Show this help
  /automation        Run under test automation
  /sound:on|off      Enable or disable sound
  /vsync:on|off      Present on vertical sync
  /fps:on|off        Log frame rates
  /padding:<0-127>   Window padding in pixels
  /buffers:<1-4>     Swap chain buffer count
  /full, /fullscreen Start full screen
  /window            Start windowed
  /clearscores       Forget saved scores
  /default           Reset options to their defaults
  /firstrun          Behave as on the first run";

/// What the command line asked for.
///
/// `None` means the switch was absent and the saved option stands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    /// `/?`
    pub help: bool,
    /// `/automation`
    pub automation: bool,
    /// `/sound:on|off`
    pub sound: Option<bool>,
    /// `/vsync:on|off`
    pub vsync: Option<bool>,
    /// `/fps:on|off`
    pub show_fps: Option<bool>,
    /// `/padding:<n>`
    pub padding: Option<u8>,
    /// `/buffers:<n>`
    pub buffers: Option<u8>,
    /// `/full` or `/window`, last one wins.
    pub fullscreen: Option<bool>,
    /// `/clearscores`
    pub clear_scores: bool,
    /// `/default`
    pub default_options: bool,
    /// `/firstrun`
    pub first_run: bool,
    /// `-servername:<name>`, accepted but unused.
    pub server_name: Option<String>,
    /// Tokens that could not be understood.
    pub rejected: Vec<String>,
}

impl CommandLine {
    /// Applies the switches on top of loaded options.
    ///
    /// `/default` runs first, so other switches still override it.
    pub fn apply(&self, options: &mut AppOptions) {
        if self.default_options {
            options.reset_to_defaults();
        }
        if self.automation {
            options.automation = true;
        }
        if self.first_run {
            options.first_run = true;
        }
        if let Some(sound) = self.sound {
            options.sound = sound;
        }
        if let Some(vsync) = self.vsync {
            options.vsync = vsync;
        }
        if let Some(show_fps) = self.show_fps {
            options.show_fps = show_fps;
        }
        if let Some(padding) = self.padding {
            options.padding = padding;
        }
        if let Some(buffers) = self.buffers {
            options.buffers = buffers;
        }
        if let Some(fullscreen) = self.fullscreen {
            options.fullscreen = fullscreen;
        }
    }
}

/// Parses command line arguments, without the program name.
pub fn parse_command_line<I, S>(args: I) -> CommandLine
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parsed = CommandLine::default();
    for arg in args {
        let token = arg.as_ref().trim();
        if token.is_empty() {
            continue;
        }
        if !parse_token(token, &mut parsed) {
            log::warn!("Bad command line parameter: {token}");
            parsed.rejected.push(token.to_owned());
        }
    }
    parsed
}

fn parse_token(token: &str, parsed: &mut CommandLine) -> bool {
    let Some(body) = token.strip_prefix(&['/', '-'][..]) else {
        return false;
    };
    let (name, value) = match body.split_once(':') {
        Some((name, value)) => (name, Some(value)),
        None => (body, None),
    };

    match (name.to_ascii_lowercase().as_str(), value) {
        ("?", None) => parsed.help = true,
        ("automation", None) => parsed.automation = true,
        ("full" | "fullscreen", None) => parsed.fullscreen = Some(true),
        ("window", None) => parsed.fullscreen = Some(false),
        ("clearscores", None) => parsed.clear_scores = true,
        ("default", None) => parsed.default_options = true,
        ("firstrun", None) => parsed.first_run = true,
        ("sound", Some(v)) => return set(&mut parsed.sound, on_off(v)),
        ("vsync", Some(v)) => return set(&mut parsed.vsync, on_off(v)),
        ("fps", Some(v)) => return set(&mut parsed.show_fps, on_off(v)),
        ("padding", Some(v)) => {
            let padding = v.parse::<u8>().ok().filter(|p| *p <= MAX_PADDING);
            return set(&mut parsed.padding, padding);
        }
        ("buffers", Some(v)) => {
            let buffers = v.parse::<u8>().ok().filter(|b| BUFFER_RANGE.contains(b));
            return set(&mut parsed.buffers, buffers);
        }
        ("servername", Some(v)) => {
            log::info!("Ignoring server name '{v}'.");
            parsed.server_name = Some(v.to_owned());
        }
        _ => return false,
    }
    true
}

fn set<T>(slot: &mut Option<T>, value: Option<T>) -> bool {
    match value {
        Some(value) => {
            *slot = Some(value);
            true
        }
        None => false,
    }
}

fn on_off(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("on") {
        Some(true)
    } else if value.eq_ignore_ascii_case("off") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_both_prefixes_in_any_case() {
        let parsed = parse_command_line(["/VSYNC:Off", "-sound:on", "/FullScreen", "-Fps:ON"]);
        assert_eq!(parsed.vsync, Some(false));
        assert_eq!(parsed.sound, Some(true));
        assert_eq!(parsed.fullscreen, Some(true));
        assert_eq!(parsed.show_fps, Some(true));
        assert!(parsed.rejected.is_empty());
    }

    #[test]
    fn out_of_range_values_are_skipped() {
        let parsed = parse_command_line(["/padding:128", "/buffers:5", "/buffers:0", "/padding:127"]);
        assert_eq!(parsed.padding, Some(127));
        assert_eq!(parsed.buffers, None);
        assert_eq!(parsed.rejected, vec!["/padding:128", "/buffers:5", "/buffers:0"]);
    }

    #[test]
    fn unknown_and_malformed_tokens_are_rejected() {
        let parsed = parse_command_line(["level1", "/bogus", "/sound:maybe", "/vsync", "/automation"]);
        assert!(parsed.automation);
        assert_eq!(parsed.rejected.len(), 4);
    }

    #[test]
    fn window_after_full_wins() {
        let parsed = parse_command_line(["/full", "/window"]);
        assert_eq!(parsed.fullscreen, Some(false));
    }

    #[test]
    fn server_name_is_accepted_and_ignored() {
        let parsed = parse_command_line(["-servername:build01"]);
        assert_eq!(parsed.server_name.as_deref(), Some("build01"));
        assert_eq!(parsed, CommandLine {
            server_name: Some("build01".into()),
            ..CommandLine::default()
        });
    }

    #[test]
    fn apply_runs_default_before_overrides() {
        let mut options = AppOptions {
            padding: 40,
            sound: false,
            ..AppOptions::default()
        };
        parse_command_line(["/default", "/buffers:4", "/firstrun"]).apply(&mut options);
        assert_eq!(options.padding, 0);
        assert!(options.sound);
        assert_eq!(options.buffers, 4);
        assert!(options.first_run);
    }
}
