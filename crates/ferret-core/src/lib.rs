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

//! # Ferret Core
//!
//! Foundational crate containing the timing primitives, the main-thread message
//! queue, the work-item contract and the small persistence types shared by every
//! other Ferret crate.

#![warn(missing_docs)]

pub mod dict;
pub mod error;
pub mod message;
pub mod mru;
pub mod time;
pub mod work;

pub use dict::{Dict, Value};
pub use error::FerretError;
pub use message::{MainMessage, MainSender, MessageQueue, WindowEvent, WindowId, WindowMessage};
pub use mru::{MruEntry, MruList};
pub use time::{
    ClockSource, EventTimer, FrameTime, GlobalTime, ManualClock, SystemClock, Timer, TimerWait,
};
pub use work::{WorkId, WorkItem};

#[doc(hidden)]
pub use log as __private_log;
