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

use super::{WindowEvent, WindowId, WindowMessage};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// A message delivered to the main thread.
pub enum MainMessage {
    /// A closure to run on the main thread.
    Invoke(Box<dyn FnOnce() + Send>),
    /// An event for one of the application windows.
    Window(WindowMessage),
    /// A request to leave the main loop with the given exit code.
    Quit(i32),
}

impl fmt::Debug for MainMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MainMessage::Invoke(_) => f.write_str("Invoke(..)"),
            MainMessage::Window(msg) => f.debug_tuple("Window").field(msg).finish(),
            MainMessage::Quit(code) => f.debug_tuple("Quit").field(code).finish(),
        }
    }
}

/// A cloneable, thread-safe handle for posting to the main thread.
#[derive(Debug, Clone)]
pub struct MainSender {
    sender: Sender<MainMessage>,
}

impl MainSender {
    /// Posts a closure to run on the main thread.
    ///
    /// ## Returns
    /// `false` if the main-thread queue no longer exists.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(MainMessage::Invoke(Box::new(f)))
    }

    /// Posts a window message.
    pub fn post_window(&self, message: WindowMessage) -> bool {
        self.send(MainMessage::Window(message))
    }

    /// Posts a quit request.
    pub fn post_quit(&self, code: i32) -> bool {
        self.send(MainMessage::Quit(code))
    }

    fn send(&self, message: MainMessage) -> bool {
        match self.sender.send(message) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Main-thread queue is gone, dropping {:?}.", e.0);
                false
            }
        }
    }
}

/// The main thread's message queue.
///
/// The queue is deliberately not `Sync`: it is created, pumped and dropped on
/// the main thread. Other threads hold a [`MainSender`].
pub struct MessageQueue {
    sender: Sender<MainMessage>,
    receiver: Receiver<MainMessage>,
    window_events: RefCell<VecDeque<WindowMessage>>,
    quit_code: Cell<Option<i32>>,
    last_activity: Cell<Instant>,
    last_mouse: Cell<Option<(WindowId, i32, i32)>>,
}

impl MessageQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        log::debug!("Main-thread message queue created.");
        Self {
            sender,
            receiver,
            window_events: RefCell::new(VecDeque::new()),
            quit_code: Cell::new(None),
            last_activity: Cell::new(Instant::now()),
            last_mouse: Cell::new(None),
        }
    }

    /// Returns a handle other threads can post through.
    pub fn sender(&self) -> MainSender {
        MainSender {
            sender: self.sender.clone(),
        }
    }

    pub(crate) fn receiver(&self) -> &Receiver<MainMessage> {
        &self.receiver
    }

    /// Processes one message.
    pub fn dispatch(&self, message: MainMessage) {
        match message {
            MainMessage::Invoke(f) => f(),
            MainMessage::Window(msg) => {
                if self.is_real_activity(&msg) {
                    self.last_activity.set(Instant::now());
                }
                self.window_events.borrow_mut().push_back(msg);
            }
            MainMessage::Quit(code) => self.request_quit(code),
        }
    }

    /// Processes every message already waiting, without blocking.
    ///
    /// ## Returns
    /// `false` once a quit has been requested.
    pub fn pump_pending(&self) -> bool {
        while let Ok(message) = self.receiver.try_recv() {
            self.dispatch(message);
        }
        self.quit_code.get().is_none()
    }

    /// Blocks up to `timeout` for a message, then processes everything waiting.
    ///
    /// ## Returns
    /// `true` if at least one message was processed.
    pub fn pump_wait(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => {
                self.dispatch(message);
                self.pump_pending();
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            // We hold a sender ourselves, so the channel can't disconnect.
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Removes and returns the buffered window messages, oldest first.
    pub fn take_window_events(&self) -> Vec<WindowMessage> {
        self.window_events.borrow_mut().drain(..).collect()
    }

    /// Returns `true` if window messages are waiting to be dispatched.
    pub fn has_window_events(&self) -> bool {
        !self.window_events.borrow().is_empty()
    }

    /// Records a quit request. The first exit code wins.
    pub fn request_quit(&self, code: i32) {
        if self.quit_code.get().is_none() {
            log::info!("Quit requested with exit code {code}.");
            self.quit_code.set(Some(code));
        }
    }

    /// The exit code of the pending quit request, if any.
    pub fn quit_code(&self) -> Option<i32> {
        self.quit_code.get()
    }

    /// The last time a "real" window message arrived.
    pub fn last_activity(&self) -> Instant {
        self.last_activity.get()
    }

    /// Marks user activity now, e.g. for input that bypasses the queue.
    pub fn note_activity(&self) {
        self.last_activity.set(Instant::now());
    }

    /// Paint messages and repeated mouse-moves to the same spot are not activity.
    fn is_real_activity(&self, msg: &WindowMessage) -> bool {
        match msg.event {
            WindowEvent::Paint => false,
            WindowEvent::MouseMove { x, y } => {
                let position = Some((msg.window, x, y));
                let duplicate = self.last_mouse.get() == position;
                self.last_mouse.set(position);
                !duplicate
            }
            _ => true,
        }
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueue")
            .field("pending", &self.receiver.len())
            .field("window_events", &self.window_events.borrow().len())
            .field("quit_code", &self.quit_code.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn message(event: WindowEvent) -> WindowMessage {
        WindowMessage::new(WindowId(1), event)
    }

    #[test]
    fn posted_closures_run_on_pump() {
        let queue = MessageQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        let sender = queue.sender();
        thread::spawn(move || {
            sender.post(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        })
        .join()
        .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(queue.pump_pending());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn window_messages_are_buffered_in_order() {
        let queue = MessageQueue::new();
        let sender = queue.sender();
        sender.post_window(message(WindowEvent::Key {
            code: 1,
            pressed: true,
        }));
        sender.post_window(message(WindowEvent::Paint));
        queue.pump_pending();

        let events: Vec<_> = queue
            .take_window_events()
            .into_iter()
            .map(|m| m.event)
            .collect();
        assert_eq!(
            events,
            vec![
                WindowEvent::Key {
                    code: 1,
                    pressed: true
                },
                WindowEvent::Paint
            ]
        );
        assert!(!queue.has_window_events());
    }

    #[test]
    fn quit_stops_pumping_and_keeps_first_code() {
        let queue = MessageQueue::new();
        queue.sender().post_quit(3);
        queue.sender().post_quit(7);
        assert!(!queue.pump_pending());
        assert_eq!(queue.quit_code(), Some(3));
    }

    #[test]
    fn paint_and_duplicate_mouse_moves_are_not_activity() {
        let queue = MessageQueue::new();
        let start = queue.last_activity();
        thread::sleep(Duration::from_millis(5));

        queue.dispatch(MainMessage::Window(message(WindowEvent::Paint)));
        assert_eq!(queue.last_activity(), start);

        queue.dispatch(MainMessage::Window(message(WindowEvent::MouseMove {
            x: 4,
            y: 4,
        })));
        let after_move = queue.last_activity();
        assert!(after_move > start);

        thread::sleep(Duration::from_millis(5));
        queue.dispatch(MainMessage::Window(message(WindowEvent::MouseMove {
            x: 4,
            y: 4,
        })));
        assert_eq!(queue.last_activity(), after_move);
    }

    #[test]
    fn pump_wait_times_out_without_messages() {
        let queue = MessageQueue::new();
        assert!(!queue.pump_wait(Duration::from_millis(10)));
        queue.sender().post(|| {});
        assert!(queue.pump_wait(Duration::from_millis(10)));
    }
}
