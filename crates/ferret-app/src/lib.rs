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

//! # Ferret App
//!
//! The application layer: process-wide services, persisted options, command
//! line handling and [`AppGlobals`], the fixed-timestep frame pump that
//! advances, renders and presents every application window.

pub mod app;
pub mod command_line;
pub mod globals;
pub mod options;

pub use app::{AppConfig, AppGlobals, AppHost, AppLock, AppWindow};
pub use command_line::{parse_command_line, CommandLine, USAGE};
pub use globals::{ProcessConfig, ProcessGlobals};
pub use options::AppOptions;
