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

use anyhow::{bail, Result};
use approx::assert_relative_eq;
use ferret_app::{AppConfig, AppGlobals, AppHost, AppOptions, AppWindow, ProcessGlobals};
use ferret_core::{GlobalTime, MainSender, ManualClock, WindowEvent, WindowId, WindowMessage};
use std::cell::RefCell;
use std::rc::Rc;
use tempfile::TempDir;

const FREQUENCY: i64 = 1_000_000;

#[derive(Default)]
struct Record {
    advances: u32,
    renders: u32,
    presents: Vec<bool>,
    vsyncs: u32,
    events: Vec<WindowEvent>,
    bank_scales: Vec<f64>,
}

struct TestWindow {
    id: WindowId,
    record: Rc<RefCell<Record>>,
    sender: MainSender,
    quit_after: Option<u32>,
    fail_at: Option<u32>,
    vsync_clock: Option<(ManualClock, f64)>,
}

impl AppWindow for TestWindow {
    fn id(&self) -> WindowId {
        self.id
    }

    fn on_event(&mut self, event: &WindowEvent) {
        self.record.borrow_mut().events.push(*event);
    }

    fn advance(&mut self, _time: &GlobalTime) -> Result<()> {
        let mut record = self.record.borrow_mut();
        if self.fail_at == Some(record.advances + 1) {
            bail!("simulation exploded");
        }
        record.advances += 1;
        if self.quit_after == Some(record.advances) {
            self.sender.post_quit(3);
        }
        Ok(())
    }

    fn render(&mut self, time: &GlobalTime) -> Result<()> {
        let mut record = self.record.borrow_mut();
        record.renders += 1;
        record.bank_scales.push(time.bank_scale);
        Ok(())
    }

    fn present(&mut self, vsync: bool) -> Result<()> {
        self.record.borrow_mut().presents.push(vsync);
        Ok(())
    }

    fn wait_vsync(&mut self) {
        self.record.borrow_mut().vsyncs += 1;
        if let Some((clock, seconds)) = &self.vsync_clock {
            clock.advance_seconds(*seconds);
        }
    }
}

#[derive(Default)]
struct TestHost {
    record: Rc<RefCell<Record>>,
    quit_after: Option<u32>,
    fail_at: Option<u32>,
    vsync_clock: Option<(ManualClock, f64)>,
    fail_window: bool,
    help_continues: bool,
    helped: bool,
    scores_cleared: bool,
}

impl AppHost for TestHost {
    fn app_name(&self) -> &str {
        "FerretTest"
    }

    fn show_help(&mut self, _usage: &str) -> bool {
        self.helped = true;
        self.help_continues
    }

    fn clear_scores(&mut self) {
        self.scores_cleared = true;
    }

    fn create_initial_window(
        &mut self,
        process: &ProcessGlobals,
        _options: &AppOptions,
    ) -> Result<Box<dyn AppWindow>> {
        if self.fail_window {
            bail!("no display");
        }
        Ok(Box::new(TestWindow {
            id: WindowId(1),
            record: Rc::clone(&self.record),
            sender: process.sender(),
            quit_after: self.quit_after,
            fail_at: self.fail_at,
            vsync_clock: self.vsync_clock.clone(),
        }))
    }
}

struct Running {
    app: AppGlobals,
    clock: ManualClock,
    _dir: TempDir,
}

/// Starts an app at 4 advances per second, capped at 4 per frame, so steps
/// are exact in binary.
fn start(host: &mut TestHost, args: &[&str]) -> Running {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("options.dat");
    AppOptions {
        advances_per_second: 4.0,
        max_advances: 4,
        ..AppOptions::default()
    }
    .save(&path)
    .unwrap();

    let clock = ManualClock::new(FREQUENCY);
    let mut app = AppGlobals::new(AppConfig {
        clock: Box::new(clock.clone()),
        options_path: Some(path),
        persist_options: true,
    });
    app.startup(host, args).unwrap();
    Running {
        app,
        clock,
        _dir: dir,
    }
}

#[test]
fn capped_catch_up_keeps_only_the_remainder() {
    let mut host = TestHost::default();
    let Running { _dir, mut app, clock } = start(&mut host, &[]);
    let delta = app.time().delta_seconds;
    assert_relative_eq!(delta, 0.25);

    clock.advance_seconds(10.5 * delta);
    assert!(app.frame_advance());
    assert_eq!(app.frame_time().advances, 4);
    assert_eq!(host.record.borrow().advances, 4);
    assert_relative_eq!(app.time().bank_seconds, 0.5 * delta);
    assert_relative_eq!(app.time().bank_scale, 0.5);
    assert_relative_eq!(app.time().absolute_seconds, 4.0 * delta);
}

#[test]
fn advances_match_the_bank() {
    let mut host = TestHost::default();
    let Running { _dir, mut app, clock } = start(&mut host, &[]);
    let delta = app.time().delta_seconds;

    clock.advance_seconds(2.5 * delta);
    assert!(app.frame_advance());
    assert_eq!(app.frame_time().advances, 2);
    assert_relative_eq!(app.time().bank_seconds, 0.5 * delta);
    assert_relative_eq!(app.time().absolute_seconds, 2.0 * delta);

    // The leftover half step completes on the next frame.
    clock.advance_seconds(0.5 * delta);
    assert!(app.frame_advance());
    assert_eq!(app.frame_time().advances, 1);
    assert_eq!(host.record.borrow().advances, 3);
}

#[test]
fn present_skips_vsync_when_behind() {
    let mut host = TestHost::default();
    let Running { _dir, mut app, clock } = start(&mut host, &[]);
    let delta = app.time().delta_seconds;

    clock.advance_seconds(delta);
    assert!(app.frame_update());
    clock.advance_seconds(3.0 * delta);
    assert!(app.frame_update());

    let record = host.record.borrow();
    assert_eq!(record.renders, 2);
    assert_eq!(record.presents, vec![true, false]);
}

#[test]
fn frames_without_steps_wait_a_vsync() {
    let mut host = TestHost::default();
    let Running { _dir, mut app, .. } = start(&mut host, &[]);

    assert!(app.frame_update());
    assert_eq!(app.frame_time().advances, 0);
    assert_eq!(app.frame_time().vsync_count, 1);
    let record = host.record.borrow();
    assert_eq!((record.renders, record.vsyncs), (0, 1));
}

#[test]
fn vsync_off_uses_the_event_timer() {
    let mut host = TestHost::default();
    let Running { _dir, mut app, clock } = start(&mut host, &["/vsync:off"]);
    assert!(app.is_event_timer_running());

    clock.advance_seconds(app.time().delta_seconds);
    assert!(app.frame_update());
    // Nothing rendered on the empty frame, and no vsync wait either.
    assert!(app.frame_update());
    let record = host.record.borrow();
    assert_eq!(record.presents, vec![false]);
    assert_eq!(record.vsyncs, 0);
}

#[test]
fn failed_advance_stops_without_consuming_the_step() {
    let mut host = TestHost {
        fail_at: Some(2),
        ..TestHost::default()
    };
    let Running { _dir, mut app, clock } = start(&mut host, &[]);
    let delta = app.time().delta_seconds;

    clock.advance_seconds(3.0 * delta);
    assert!(!app.frame_advance());
    assert_eq!(host.record.borrow().advances, 1);
    assert_relative_eq!(app.time().bank_seconds, 2.0 * delta);
}

#[test]
fn quit_during_catch_up_stops_the_frame() {
    let mut host = TestHost {
        quit_after: Some(2),
        ..TestHost::default()
    };
    let Running { _dir, mut app, clock } = start(&mut host, &[]);

    clock.advance_seconds(4.0 * app.time().delta_seconds);
    assert!(!app.frame_update());
    assert_eq!(host.record.borrow().advances, 2);
    assert_eq!(app.quit_code(), Some(3));
    assert_eq!(app.run(), 3);
}

#[test]
fn messages_reach_windows_between_steps() {
    let mut host = TestHost::default();
    let Running { _dir, mut app, clock } = start(&mut host, &[]);
    let sender = app.process().unwrap().sender();
    sender.post_window(WindowMessage::new(WindowId(1), WindowEvent::Key {
        code: 32,
        pressed: true,
    }));
    sender.post_window(WindowMessage::new(WindowId(9), WindowEvent::Paint));

    clock.advance_seconds(2.0 * app.time().delta_seconds);
    assert!(app.frame_advance());
    assert_eq!(
        host.record.borrow().events,
        vec![WindowEvent::Key {
            code: 32,
            pressed: true
        }]
    );
}

#[test]
fn destroyed_windows_leave_at_cleanup() {
    let mut host = TestHost::default();
    let Running { _dir, mut app, .. } = start(&mut host, &[]);

    assert!(app.destroy_window(WindowId(1)));
    assert!(!app.destroy_window(WindowId(1)));
    assert_eq!(app.window_count(), 1);
    assert!(!app.is_closable());

    assert_eq!(app.frame_cleanup(), 1);
    assert_eq!(app.window_count(), 0);
    assert!(app.is_closable());

    app.lock_app();
    assert!(!app.is_closable());
    app.unlock_app();
    assert!(app.is_closable());
}

#[test]
fn close_message_ends_the_run() {
    let mut host = TestHost::default();
    let Running { _dir, mut app, .. } = start(&mut host, &[]);
    app.process()
        .unwrap()
        .sender()
        .post_window(WindowMessage::new(WindowId(1), WindowEvent::Close));

    assert_eq!(app.run(), 0);
    assert_eq!(app.window_count(), 0);
    assert_eq!(host.record.borrow().events, vec![WindowEvent::Close]);
}

#[test]
fn run_paces_on_vsync_until_quit() {
    let clock = ManualClock::new(FREQUENCY);
    let mut host = TestHost {
        quit_after: Some(3),
        // Each vsync wait lets one full step of time pass.
        vsync_clock: Some((clock.clone(), 0.25)),
        ..TestHost::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("options.dat");
    AppOptions {
        advances_per_second: 4.0,
        ..AppOptions::default()
    }
    .save(&path)
    .unwrap();
    let mut app = AppGlobals::new(AppConfig {
        clock: Box::new(clock),
        options_path: Some(path),
        persist_options: true,
    });
    app.startup(&mut host, &[] as &[&str]).unwrap();

    assert_eq!(app.run(), 3);
    let record = host.record.borrow();
    assert_eq!(record.advances, 3);
    assert_eq!(record.renders, 3);
    assert!(record.vsyncs >= 3);
    assert!(record.bank_scales.iter().all(|s| (0.0..1.0).contains(s)));
}

#[test]
fn help_aborts_startup_unless_the_host_continues() {
    let mut host = TestHost::default();
    let mut app = AppGlobals::new(AppConfig {
        persist_options: false,
        ..AppConfig::default()
    });
    assert!(app.startup(&mut host, &["/?"]).is_err());
    assert!(host.helped);
    assert!(!app.is_valid());
    app.shutdown();

    let mut host = TestHost {
        help_continues: true,
        ..TestHost::default()
    };
    let mut app = AppGlobals::new(AppConfig {
        persist_options: false,
        ..AppConfig::default()
    });
    app.startup(&mut host, &["/?", "/clearscores"]).unwrap();
    assert!(app.is_valid());
    assert!(host.scores_cleared);
}

#[test]
fn window_failure_fails_startup() {
    let mut host = TestHost {
        fail_window: true,
        ..TestHost::default()
    };
    let mut app = AppGlobals::new(AppConfig {
        persist_options: false,
        ..AppConfig::default()
    });
    let err = app.startup(&mut host, &[] as &[&str]).unwrap_err();
    assert!(format!("{err:#}").contains("no display"));
    assert!(!app.is_valid());
    assert!(app.process().is_none());
    app.shutdown();
    assert_eq!(app.window_count(), 0);
}

#[test]
fn options_survive_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Demo-options.dat");
    let mut host = TestHost::default();

    let mut app = AppGlobals::new(AppConfig {
        options_path: Some(path.clone()),
        ..AppConfig::default()
    });
    app.startup(&mut host, &["/padding:20", "/sound:off"]).unwrap();
    assert!(app.options().first_run);
    app.options_mut().mru.add("level1.dat", "Level 1", false);
    app.shutdown();

    let saved = AppOptions::load(&path);
    assert_eq!(saved.padding, 20);
    assert!(!saved.sound);
    assert!(!saved.first_run);
    assert_eq!(saved.mru.len(), 1);

    let mut app = AppGlobals::new(AppConfig {
        options_path: Some(path),
        ..AppConfig::default()
    });
    app.startup(&mut host, &["/default"]).unwrap();
    assert_eq!(app.options().padding, 0);
    assert!(app.options().sound);
    assert_eq!(app.options().mru.len(), 1);
}

#[test]
fn unusable_saved_rates_do_not_stop_startup() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Demo-options.dat");
    AppOptions {
        vsync: false,
        frames_per_second: 1e-20,
        advances_per_second: 1e-20,
        max_advances: u32::MAX,
        ..AppOptions::default()
    }
    .save(&path)
    .unwrap();

    let mut host = TestHost::default();
    let mut app = AppGlobals::new(AppConfig {
        clock: Box::new(ManualClock::new(FREQUENCY)),
        options_path: Some(path),
        persist_options: true,
    });
    app.startup(&mut host, &[] as &[&str]).unwrap();

    let defaults = AppOptions::default();
    assert_eq!(app.time().frames_per_second, defaults.frames_per_second);
    assert_eq!(app.time().advances_per_second, defaults.advances_per_second);
    assert_eq!(app.frame_time().max_advances, defaults.max_advances);
    assert!(app.is_event_timer_running());
    assert!(app.frame_update());
}
