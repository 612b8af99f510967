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

//! The main-thread message queue.
//!
//! Every thread may post to the main thread through a [`MainSender`]: closures
//! to invoke, window messages, or a quit request. Only the main thread owns the
//! [`MessageQueue`] and pumps it. Posted closures run inline while pumping;
//! window messages are buffered in arrival order until the application
//! dispatches them to its windows.

mod queue;

pub use self::queue::{MainMessage, MainSender, MessageQueue};

/// Identifies an application window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

/// Platform-neutral window events carried by the message queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowEvent {
    /// The window contents must be repainted.
    Paint,
    /// The pointer moved to the given client position.
    MouseMove {
        /// Horizontal position in pixels.
        x: i32,
        /// Vertical position in pixels.
        y: i32,
    },
    /// A mouse button changed state.
    MouseButton {
        /// Button index (0 = left).
        button: u8,
        /// `true` when pressed.
        pressed: bool,
    },
    /// A key changed state.
    Key {
        /// Platform key code.
        code: u32,
        /// `true` when pressed.
        pressed: bool,
    },
    /// The window gained (`true`) or lost (`false`) activation.
    Activate(bool),
    /// The client area changed size.
    Resize {
        /// New width in pixels.
        width: u32,
        /// New height in pixels.
        height: u32,
    },
    /// The user asked to close the window.
    Close,
    /// Application-defined message.
    User(u32),
}

impl WindowEvent {
    /// Returns `true` for repaint requests.
    #[inline]
    pub fn is_paint(&self) -> bool {
        matches!(self, WindowEvent::Paint)
    }
}

/// A window event addressed to one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowMessage {
    /// The target window.
    pub window: WindowId,
    /// The event.
    pub event: WindowEvent,
}

impl WindowMessage {
    /// Creates a message for `window`.
    pub fn new(window: WindowId, event: WindowEvent) -> Self {
        Self { window, event }
    }
}
