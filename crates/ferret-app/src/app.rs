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

//! The application frame pump.
//!
//! [`AppGlobals`] owns the [`Timer`] and the [`GlobalTime`] and drives every
//! window through a fixed-timestep loop. Each iteration of [`AppGlobals::run`]
//! waits for the next frame (vsync-paced message wait, or an [`EventTimer`]
//! when vsync is off), dispatches window messages, runs idle work and then
//! calls [`AppGlobals::frame_update`]:
//!
//! 1. [`frame_advance`](AppGlobals::frame_advance) turns banked wall-clock
//!    time into fixed simulation steps, at most `max_advances` per frame.
//! 2. [`frame_render`](AppGlobals::frame_render) and
//!    [`frame_present`](AppGlobals::frame_present) run if at least one step
//!    was taken; otherwise [`frame_vsync`](AppGlobals::frame_vsync) keeps the
//!    vsync count going.
//! 3. [`frame_cleanup`](AppGlobals::frame_cleanup) drops the windows
//!    destroyed during the frame.

use crate::command_line::{parse_command_line, USAGE};
use crate::globals::{ProcessConfig, ProcessGlobals};
use crate::options::AppOptions;
use anyhow::{Context, Result};
use ferret_core::{
    check_invariant, ClockSource, EventTimer, FerretError, FrameTime, GlobalTime, SystemClock,
    Timer, WindowEvent, WindowId,
};
use ferret_telemetry::{FrameRates, FrameStats, SystemInfo};
use ferret_threading::IdleConfig;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A window driven by the frame pump.
pub trait AppWindow {
    /// The window identifier used to route messages.
    fn id(&self) -> WindowId;

    /// Handles a window message. `Close` also schedules the window for
    /// destruction at the end of the frame.
    fn on_event(&mut self, _event: &WindowEvent) {}

    /// Runs one fixed simulation step.
    fn advance(&mut self, time: &GlobalTime) -> Result<()>;

    /// Draws the current state; `time.bank_scale` is the fraction of a step
    /// to interpolate by.
    fn render(&mut self, time: &GlobalTime) -> Result<()>;

    /// Shows the rendered frame.
    fn present(&mut self, vsync: bool) -> Result<()>;

    /// Waits one vertical blank on a frame where nothing was rendered.
    fn wait_vsync(&mut self) {}
}

/// Application-specific hooks used during startup.
pub trait AppHost {
    /// Name used for the options file and logs.
    fn app_name(&self) -> &str;

    /// Shows the command line help.
    ///
    /// ## Returns
    /// `true` to continue starting up, `false` to abort.
    fn show_help(&mut self, usage: &str) -> bool {
        log::info!("{usage}");
        false
    }

    /// Decides whether this machine can run the application.
    fn check_system(&self, system: &SystemInfo) -> bool {
        system.logical_cpus >= 1
    }

    /// Forgets saved scores (`/clearscores`).
    fn clear_scores(&mut self) {}

    /// Creates the first window once the process services are up.
    fn create_initial_window(
        &mut self,
        process: &ProcessGlobals,
        options: &AppOptions,
    ) -> Result<Box<dyn AppWindow>>;
}

/// Shared counter that keeps the application from closing.
///
/// Clones share the counter and may be moved to other threads, e.g. to hold
/// the application open during an asynchronous save.
#[derive(Debug, Clone, Default)]
pub struct AppLock {
    count: Arc<AtomicI32>,
}

impl AppLock {
    /// Takes a lock and returns the new count.
    pub fn lock(&self) -> i32 {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Releases a lock and returns the new count.
    ///
    /// Unlocking more often than locking is reported and undone.
    pub fn unlock(&self) -> i32 {
        let previous = self.count.fetch_sub(1, Ordering::SeqCst);
        if !check_invariant!(previous > 0, "unlock_app without a matching lock_app") {
            return self.count.fetch_add(1, Ordering::SeqCst) + 1;
        }
        previous - 1
    }

    /// The current count.
    pub fn count(&self) -> i32 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Construction settings for [`AppGlobals`].
pub struct AppConfig {
    /// The raw clock behind the frame timer.
    pub clock: Box<dyn ClockSource>,
    /// Options file. `None` picks the default location for the app name.
    pub options_path: Option<PathBuf>,
    /// Load and save the options file.
    pub persist_options: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            clock: Box::new(SystemClock::new()),
            options_path: None,
            persist_options: true,
        }
    }
}

/// The application: its options, its windows and the frame pump.
pub struct AppGlobals {
    timer: Timer,
    time: GlobalTime,
    frame: FrameTime,
    options: AppOptions,
    options_path: Option<PathBuf>,
    persist_options: bool,
    process: Option<ProcessGlobals>,
    windows: Vec<Box<dyn AppWindow>>,
    doomed: Vec<WindowId>,
    event_timer: Option<EventTimer>,
    event_timer_failed: bool,
    lock: AppLock,
    update_requested: bool,
    stats: FrameStats,
    valid: bool,
}

impl AppGlobals {
    /// Creates an application that has not started yet.
    pub fn new(config: AppConfig) -> Self {
        Self {
            timer: Timer::with_clock(config.clock),
            time: GlobalTime::default(),
            frame: FrameTime::default(),
            options: AppOptions::default(),
            options_path: config.options_path,
            persist_options: config.persist_options,
            process: None,
            windows: Vec::new(),
            doomed: Vec::new(),
            event_timer: None,
            event_timer_failed: false,
            lock: AppLock::default(),
            update_requested: false,
            stats: FrameStats::new(),
            valid: false,
        }
    }

    /// Starts the application.
    ///
    /// Parses `args`, loads the options and applies the command line on top,
    /// checks the machine, brings up the process services, computes the
    /// simulation rates and creates the first window.
    ///
    /// ## Errors
    /// Any failure aborts startup and leaves [`is_valid`](Self::is_valid)
    /// false; the caller should still call [`shutdown`](Self::shutdown).
    pub fn startup<S: AsRef<str>>(&mut self, host: &mut dyn AppHost, args: &[S]) -> Result<()> {
        log::info!("Starting {}...", host.app_name());

        let command_line = parse_command_line(args);
        if command_line.help && !host.show_help(USAGE) {
            return Err(FerretError::Startup("help requested".into()).into());
        }

        if self.options_path.is_none() && self.persist_options {
            self.options_path = AppOptions::default_path(host.app_name());
        }
        self.options = match (&self.options_path, self.persist_options) {
            (Some(path), true) => AppOptions::load(path),
            _ => AppOptions::default(),
        };
        command_line.apply(&mut self.options);
        if command_line.clear_scores {
            host.clear_scores();
        }

        let system = SystemInfo::collect();
        system.log_summary();
        if !host.check_system(&system) {
            return Err(FerretError::Startup("this machine does not meet the requirements".into()).into());
        }

        let process = ProcessGlobals::init(ProcessConfig {
            idle: IdleConfig {
                timeout: self.options.idle_timeout,
            },
            ..ProcessConfig::for_system(&system)
        });

        self.time
            .set_rates(self.options.advances_per_second, self.options.frames_per_second);
        self.time.reset();
        self.frame = FrameTime::new(self.options.max_advances);

        let window = host
            .create_initial_window(&process, &self.options)
            .context("failed to create the initial window")?;
        self.process = Some(process);
        self.windows.push(window);

        self.timer.reset();
        self.update_event_timer();
        self.valid = true;
        log::info!(
            "{} started: {} advances/s, {} frames/s, vsync {}.",
            host.app_name(),
            self.time.advances_per_second,
            self.time.frames_per_second,
            if self.options.vsync { "on" } else { "off" }
        );
        Ok(())
    }

    /// Runs the main loop until a quit request or until the application
    /// becomes closable.
    ///
    /// ## Returns
    /// The exit code.
    pub fn run(&mut self) -> i32 {
        if !self.valid {
            log::error!("The main loop cannot run before a successful startup.");
            return 1;
        }
        loop {
            if let Some(code) = self.quit_code() {
                return code;
            }
            if self.is_closable() {
                log::info!("Nothing keeps the application open, leaving the main loop.");
                return 0;
            }

            self.wait_for_frame();
            self.dispatch_window_events();
            if let Some(process) = &self.process {
                process.poll_idle();
            }

            if !self.frame_update() {
                return self.quit_code().unwrap_or_else(|| {
                    log::error!("A frame failed, leaving the main loop.");
                    1
                });
            }
        }
    }

    /// Runs one frame: advance, then render and present or wait a vsync,
    /// then cleanup.
    ///
    /// ## Returns
    /// `false` if the loop must stop (failed advance or quit).
    pub fn frame_update(&mut self) -> bool {
        self.update_requested = false;

        let running = self.frame_advance();
        if running {
            if self.frame.advances > 0 {
                self.frame_render();
                self.frame_present();
            } else if self.is_vsync_wait() {
                self.frame_vsync();
            }
        }
        self.frame_cleanup();

        if self.options.show_fps {
            let capped = self.frame.is_capped();
            if let Some(rates) =
                self.stats
                    .record_frame(self.timer.seconds(), self.frame.advances, capped)
            {
                log::info!(
                    "{:.1} fps, {:.1} advances/s, {} capped frames",
                    rates.frames_per_second,
                    rates.advances_per_second,
                    rates.capped_frames
                );
            }
        }
        running
    }

    /// Converts banked time into fixed simulation steps.
    ///
    /// Steps are taken while the bank holds at least one `delta_seconds`. Past
    /// `max_advances` steps the bank is reduced modulo the step and the loop
    /// stops. Messages are pumped between steps so input stays live during
    /// catch-up.
    ///
    /// ## Returns
    /// `false` if a window failed to advance or a quit arrived mid-frame.
    pub fn frame_advance(&mut self) -> bool {
        self.frame.reset();
        let elapsed = self.timer.tick();
        self.time.bank_seconds += elapsed;

        let delta = self.time.delta_seconds;
        while self.time.bank_seconds >= delta {
            if self.frame.is_capped() {
                self.time.bank_seconds %= delta;
                log::debug!(
                    "Advance cap of {} reached, dropping the backlog.",
                    self.frame.max_advances
                );
                break;
            }
            if self.frame.advances > 0 && !self.pump_messages() {
                return false;
            }

            self.frame.record_advance(self.timer.current_raw_time());
            let doomed = &self.doomed;
            for window in self.windows.iter_mut().filter(|w| !doomed.contains(&w.id())) {
                if let Err(e) = window.advance(&self.time) {
                    log::error!("Window {:?} failed to advance: {e:#}", window.id());
                    return false;
                }
            }
            self.time.bank_seconds -= delta;
            self.time.absolute_seconds += delta;
        }
        self.time.bank_scale = self.time.bank_seconds / delta;
        true
    }

    /// Renders every window.
    ///
    /// ## Returns
    /// `false` if any window failed to render. Failures are logged and the
    /// remaining windows still render.
    pub fn frame_render(&mut self) -> bool {
        self.frame.record_render(self.timer.current_raw_time());
        let mut ok = true;
        let doomed = &self.doomed;
        for window in self.windows.iter_mut().filter(|w| !doomed.contains(&w.id())) {
            if let Err(e) = window.render(&self.time) {
                log::warn!("Window {:?} failed to render: {e:#}", window.id());
                ok = false;
            }
        }
        ok
    }

    /// Presents every window.
    ///
    /// Vsync is skipped when the frame took more than one step: the loop is
    /// already behind.
    pub fn frame_present(&mut self) -> bool {
        let vsync = self.options.vsync && self.frame.advances <= 1;
        let mut ok = true;
        let doomed = &self.doomed;
        for window in self.windows.iter_mut().filter(|w| !doomed.contains(&w.id())) {
            if let Err(e) = window.present(vsync) {
                log::warn!("Window {:?} failed to present: {e:#}", window.id());
                ok = false;
            }
        }
        ok
    }

    /// Counts a vsync on a frame without steps.
    pub fn frame_vsync(&mut self) {
        self.frame.record_vsync();
        let doomed = &self.doomed;
        for window in self.windows.iter_mut().filter(|w| !doomed.contains(&w.id())) {
            window.wait_vsync();
        }
    }

    /// Drops the windows destroyed during this frame.
    ///
    /// ## Returns
    /// The number of windows dropped.
    pub fn frame_cleanup(&mut self) -> usize {
        if self.doomed.is_empty() {
            return 0;
        }
        let doomed = std::mem::take(&mut self.doomed);
        let before = self.windows.len();
        self.windows.retain(|w| !doomed.contains(&w.id()));
        let removed = before - self.windows.len();
        log::debug!("Dropped {removed} destroyed windows, {} left.", self.windows.len());
        removed
    }

    /// Adds another window to the pump.
    pub fn add_window(&mut self, window: Box<dyn AppWindow>) {
        log::debug!("Window {:?} added.", window.id());
        self.windows.push(window);
    }

    /// Schedules a window for destruction at the end of the frame.
    ///
    /// ## Returns
    /// `false` if no such window is alive.
    pub fn destroy_window(&mut self, id: WindowId) -> bool {
        if self.doomed.contains(&id) || !self.windows.iter().any(|w| w.id() == id) {
            return false;
        }
        self.doomed.push(id);
        true
    }

    /// Keeps the application open until the matching [`unlock_app`](Self::unlock_app).
    pub fn lock_app(&self) -> i32 {
        self.lock.lock()
    }

    /// Releases a [`lock_app`](Self::lock_app).
    pub fn unlock_app(&self) -> i32 {
        self.lock.unlock()
    }

    /// A lock handle that can be moved to other threads.
    pub fn app_lock(&self) -> AppLock {
        self.lock.clone()
    }

    /// Returns `true` when no lock is held and no window is open.
    pub fn is_closable(&self) -> bool {
        self.lock.count() == 0 && self.windows.is_empty()
    }

    /// Asks the main loop to exit with `code`.
    pub fn request_quit(&self, code: i32) {
        match &self.process {
            Some(process) => process.queue().request_quit(code),
            None => log::warn!("Quit requested before startup, ignoring."),
        }
    }

    /// The pending quit code, if a quit was requested.
    pub fn quit_code(&self) -> Option<i32> {
        self.process.as_ref().and_then(|p| p.queue().quit_code())
    }

    /// Runs the next frame without waiting.
    pub fn request_frame_update(&mut self) {
        self.update_requested = true;
    }

    /// Ends the process immediately, skipping every shutdown step.
    pub fn kill_process(code: i32) -> ! {
        log::error!("Killing the process with exit code {code}.");
        log::logger().flush();
        std::process::exit(code)
    }

    /// Saves the options, ends the worker threads and drops the windows.
    ///
    /// Safe to call after a failed startup and more than once.
    pub fn shutdown(&mut self) {
        let was_valid = std::mem::replace(&mut self.valid, false);
        if was_valid && self.persist_options {
            if let Some(path) = &self.options_path {
                self.options.first_run = false;
                if let Err(e) = self.options.save(path) {
                    log::warn!("Failed to save options: {e}");
                }
            }
        }

        self.event_timer = None;
        if let Some(process) = &self.process {
            process.shutdown();
        }
        if !self.windows.is_empty() {
            log::debug!("Dropping {} windows.", self.windows.len());
        }
        self.doomed.clear();
        self.windows.clear();
        if self.process.take().is_some() {
            log::info!("Application shut down.");
        }
    }

    /// Returns `true` after a successful startup, until shutdown.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The current options.
    pub fn options(&self) -> &AppOptions {
        &self.options
    }

    /// The current options, mutably. Rates take effect on the next startup.
    pub fn options_mut(&mut self) -> &mut AppOptions {
        &mut self.options
    }

    /// Where the options are loaded from and saved to.
    pub fn options_path(&self) -> Option<&Path> {
        self.options_path.as_deref()
    }

    /// The simulation clock.
    pub fn time(&self) -> &GlobalTime {
        &self.time
    }

    /// The timing record of the last frame.
    pub fn frame_time(&self) -> &FrameTime {
        &self.frame
    }

    /// The frame timer.
    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// The process services, after startup.
    pub fn process(&self) -> Option<&ProcessGlobals> {
        self.process.as_ref()
    }

    /// Number of open windows, including those destroyed this frame.
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    /// Number of held application locks.
    pub fn lock_count(&self) -> i32 {
        self.lock.count()
    }

    /// Returns `true` while frames are paced by the event timer.
    pub fn is_event_timer_running(&self) -> bool {
        self.event_timer.is_some()
    }

    /// The last one-second frame rate rollup, when `show_fps` is on.
    pub fn frame_rates(&self) -> Option<FrameRates> {
        self.stats.last()
    }

    fn is_vsync_wait(&self) -> bool {
        self.event_timer.is_none()
    }

    /// Starts or stops the event timer to match the vsync option. A timer
    /// that failed to start is never retried.
    fn update_event_timer(&mut self) -> bool {
        if self.options.vsync {
            if self.event_timer.take().is_some() {
                log::debug!("Vsync enabled, event timer stopped.");
            }
            return false;
        }
        if self.event_timer.is_none() && !self.event_timer_failed {
            match EventTimer::for_frame_rate(self.time.frames_per_second) {
                Ok(timer) => self.event_timer = Some(timer),
                Err(e) => {
                    log::warn!("Event timer unavailable, pacing frames on vsync instead: {e}");
                    self.event_timer_failed = true;
                }
            }
        }
        self.event_timer.is_some()
    }

    fn wait_for_frame(&mut self) {
        let timed = self.update_event_timer();
        let Some(process) = &self.process else {
            return;
        };
        let queue = process.queue();
        if self.update_requested || queue.has_window_events() {
            queue.pump_pending();
            return;
        }

        let frame_interval = Duration::try_from_secs_f64(1.0 / self.time.frames_per_second)
            .unwrap_or(EventTimer::MAX_INTERVAL);
        let timeout = process.wait_timeout(frame_interval);
        match &self.event_timer {
            Some(timer) if timed => {
                timer.wait(queue, timeout);
            }
            _ => {
                queue.pump_wait(timeout);
            }
        }
    }

    fn pump_messages(&mut self) -> bool {
        let running = match &self.process {
            Some(process) => process.queue().pump_pending(),
            None => true,
        };
        self.dispatch_window_events();
        running
    }

    fn dispatch_window_events(&mut self) {
        let Some(process) = &self.process else {
            return;
        };
        for message in process.queue().take_window_events() {
            match self.windows.iter_mut().find(|w| w.id() == message.window) {
                Some(window) => window.on_event(&message.event),
                None => {
                    log::debug!("Dropping {:?} for unknown window {:?}.", message.event, message.window);
                    continue;
                }
            }
            if matches!(message.event, WindowEvent::Close) {
                self.destroy_window(message.window);
            }
        }
    }
}

impl Drop for AppGlobals {
    fn drop(&mut self) {
        if self.valid || self.process.is_some() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for AppGlobals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppGlobals")
            .field("valid", &self.valid)
            .field("windows", &self.windows.len())
            .field("locks", &self.lock.count())
            .field("time", &self.time)
            .finish()
    }
}
