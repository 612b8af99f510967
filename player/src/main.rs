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

// Headless player: runs the frame pump against headless devices.
// Run with: cargo run -p ferret-player -- /fps:on /vsync:off

mod window;

use anyhow::{Context, Result};
use ferret_app::{AppConfig, AppGlobals, AppHost, AppOptions, AppWindow, ProcessGlobals};
use ferret_core::WorkItem;
use ferret_telemetry::{init_console_logging, init_logging, LogConfig};
use ferret_threading::{CommandGroups, CommandId, CommandListener, GroupId};
use std::path::PathBuf;
use std::sync::Arc;
use window::{PlayerWindow, Script, DEVICE_GROUP};

const APP_NAME: &str = "FerretPlayer";

/// Logs command refreshes instead of updating a menu.
struct MenuRefresh;

impl CommandListener for MenuRefresh {
    fn update_commands(&self, commands: &[CommandId]) {
        log::info!("Refreshing commands {commands:?}.");
    }

    fn update_groups(&self, groups: &[GroupId]) {
        log::info!("Refreshing command groups {groups:?}.");
    }

    fn update_all(&self) {
        log::info!("Refreshing every command.");
    }
}

/// Pretends to load a level on a worker thread.
struct LoadLevel {
    name: String,
}

impl WorkItem for LoadLevel {
    fn priority(&self) -> i32 {
        10
    }

    fn run(&self) {
        let checksum: u64 = self.name.bytes().map(u64::from).sum();
        log::debug!("Level '{}' loaded (checksum {checksum}).", self.name);
    }

    fn on_complete(&self) {
        log::info!("Level '{}' is ready.", self.name);
    }

    fn on_cancel(&self) {
        log::warn!("Loading of '{}' was cancelled.", self.name);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

struct PlayerHost;

impl AppHost for PlayerHost {
    fn app_name(&self) -> &str {
        APP_NAME
    }

    fn show_help(&mut self, usage: &str) -> bool {
        println!("{APP_NAME}\n\n{usage}");
        false
    }

    fn create_initial_window(
        &mut self,
        process: &ProcessGlobals,
        options: &AppOptions,
    ) -> Result<Box<dyn AppWindow>> {
        let commands = CommandGroups::new(Arc::clone(process.idle()), Arc::new(MenuRefresh));
        commands.map_command(CommandId(1), DEVICE_GROUP);
        commands.map_command(CommandId(2), DEVICE_GROUP);

        process.pool().add(Arc::new(LoadLevel {
            name: "level1".into(),
        }));

        let seconds = if options.automation { 2.0 } else { 10.0 };
        let advances = (seconds * options.advances_per_second) as u64;
        let script = Script {
            lose_devices_at: advances / 2,
            quit_after: advances.max(1),
        };

        let window = PlayerWindow::new(
            process.sender(),
            commands,
            options.sound,
            options.buffers,
            script,
        )
        .context("cannot create the player window")?;
        Ok(Box::new(window))
    }
}

fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

fn main() -> Result<()> {
    let log_config = LogConfig {
        directory: log_directory(),
        console: true,
        ..LogConfig::default()
    };
    if let Err(e) = init_logging(&log_config) {
        init_console_logging(log_config.level);
        log::warn!("Logging to the console only: {e}");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut host = PlayerHost;
    let mut app = AppGlobals::new(AppConfig::default());
    if let Err(e) = app.startup(&mut host, &args) {
        app.shutdown();
        return Err(e.context("startup failed"));
    }

    let code = app.run();
    app.shutdown();
    log::info!("{APP_NAME} exited with code {code}.");
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
