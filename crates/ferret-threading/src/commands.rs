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

//! Coalesced refresh of UI command state.
//!
//! Invalidations are cheap: they only record ids. The refresh itself is queued
//! once on the [`IdleMaster`] and delivered to the [`CommandListener`] as a
//! single batch carrying the union of everything invalidated in between.

use crate::idle::IdleMaster;
use crate::lock;
use ferret_core::WorkItem;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};

/// Identifies a UI command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub u32);

/// Opaque identifier of a command group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

/// Receives batched command refreshes on the main thread.
pub trait CommandListener: Send + Sync {
    /// The listed commands must refresh their state.
    fn update_commands(&self, commands: &[CommandId]);
    /// The listed groups changed.
    fn update_groups(&self, groups: &[GroupId]);
    /// Everything must refresh.
    fn update_all(&self);
}

#[derive(Default)]
struct Pending {
    commands: BTreeSet<CommandId>,
    groups: BTreeSet<GroupId>,
    all: bool,
    scheduled: bool,
}

/// Maps commands to groups and batches their invalidation.
pub struct CommandGroups {
    this: Weak<CommandGroups>,
    idle: Arc<IdleMaster>,
    listener: Arc<dyn CommandListener>,
    membership: Mutex<HashMap<CommandId, GroupId>>,
    pending: Mutex<Pending>,
}

impl CommandGroups {
    /// Creates the registry; refreshes are scheduled on `idle`.
    pub fn new(idle: Arc<IdleMaster>, listener: Arc<dyn CommandListener>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            idle,
            listener,
            membership: Mutex::new(HashMap::new()),
            pending: Mutex::new(Pending::default()),
        })
    }

    /// Puts `command` in `group`, replacing any previous group.
    pub fn map_command(&self, command: CommandId, group: GroupId) {
        lock(&self.membership).insert(command, group);
    }

    /// Removes `command` from its group.
    pub fn unmap_command(&self, command: CommandId) {
        lock(&self.membership).remove(&command);
    }

    /// The group `command` belongs to.
    pub fn group_of(&self, command: CommandId) -> Option<GroupId> {
        lock(&self.membership).get(&command).copied()
    }

    /// Commands mapped to `group`, in ascending order.
    pub fn commands_in(&self, group: GroupId) -> Vec<CommandId> {
        let mut commands: Vec<CommandId> = lock(&self.membership)
            .iter()
            .filter(|(_, g)| **g == group)
            .map(|(c, _)| *c)
            .collect();
        commands.sort_unstable();
        commands
    }

    /// Schedules a refresh of one command.
    pub fn invalidate_command(&self, command: CommandId) {
        self.invalidate(|pending| {
            pending.commands.insert(command);
        });
    }

    /// Schedules a refresh of a group and every command mapped to it.
    pub fn invalidate_group(&self, group: GroupId) {
        let commands = self.commands_in(group);
        self.invalidate(|pending| {
            pending.groups.insert(group);
            pending.commands.extend(commands);
        });
    }

    /// Schedules a refresh of everything.
    pub fn invalidate_all(&self) {
        self.invalidate(|pending| {
            pending.all = true;
            pending.commands.clear();
            pending.groups.clear();
        });
    }

    /// Returns `true` if a refresh is queued.
    pub fn is_refresh_scheduled(&self) -> bool {
        lock(&self.pending).scheduled
    }

    fn invalidate(&self, record: impl FnOnce(&mut Pending)) {
        let schedule = {
            let mut pending = lock(&self.pending);
            // Once everything is invalid, per-id bookkeeping is pointless.
            if !pending.all {
                record(&mut *pending);
            }
            !std::mem::replace(&mut pending.scheduled, true)
        };
        if schedule {
            self.idle.add(Arc::new(RefreshCommands {
                groups: self.this.clone(),
            }));
        }
    }

    fn deliver(&self) {
        let pending = std::mem::take(&mut *lock(&self.pending));
        if pending.all {
            self.listener.update_all();
            return;
        }
        if !pending.commands.is_empty() {
            let commands: Vec<CommandId> = pending.commands.into_iter().collect();
            self.listener.update_commands(&commands);
        }
        if !pending.groups.is_empty() {
            let groups: Vec<GroupId> = pending.groups.into_iter().collect();
            self.listener.update_groups(&groups);
        }
    }

    fn refresh_cancelled(&self) {
        lock(&self.pending).scheduled = false;
    }
}

impl std::fmt::Debug for CommandGroups {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandGroups")
            .field("commands", &lock(&self.membership).len())
            .field("scheduled", &self.is_refresh_scheduled())
            .finish()
    }
}

/// Idle work delivering the accumulated batch.
struct RefreshCommands {
    groups: Weak<CommandGroups>,
}

impl WorkItem for RefreshCommands {
    fn run(&self) {
        if let Some(groups) = self.groups.upgrade() {
            groups.deliver();
        }
    }

    fn on_cancel(&self) {
        if let Some(groups) = self.groups.upgrade() {
            groups.refresh_cancelled();
        }
    }

    fn name(&self) -> &str {
        "refresh commands"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Update {
        Commands(Vec<CommandId>),
        Groups(Vec<GroupId>),
        All,
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Update>>);

    impl CommandListener for Recorder {
        fn update_commands(&self, commands: &[CommandId]) {
            self.0.lock().unwrap().push(Update::Commands(commands.to_vec()));
        }
        fn update_groups(&self, groups: &[GroupId]) {
            self.0.lock().unwrap().push(Update::Groups(groups.to_vec()));
        }
        fn update_all(&self) {
            self.0.lock().unwrap().push(Update::All);
        }
    }

    fn setup() -> (Arc<IdleMaster>, Arc<Recorder>, Arc<CommandGroups>) {
        let idle = Arc::new(IdleMaster::default());
        let recorder = Arc::new(Recorder::default());
        let groups = CommandGroups::new(Arc::clone(&idle), recorder.clone());
        (idle, recorder, groups)
    }

    #[test]
    fn invalidations_coalesce_into_one_refresh() {
        let (idle, recorder, groups) = setup();
        groups.map_command(CommandId(10), GroupId(1));
        groups.map_command(CommandId(11), GroupId(1));
        groups.map_command(CommandId(20), GroupId(2));

        groups.invalidate_command(CommandId(20));
        groups.invalidate_group(GroupId(1));
        groups.invalidate_command(CommandId(20));
        assert_eq!(idle.pending_count(), 1);
        assert!(recorder.0.lock().unwrap().is_empty());

        assert_eq!(idle.force_idle(), 1);
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                Update::Commands(vec![CommandId(10), CommandId(11), CommandId(20)]),
                Update::Groups(vec![GroupId(1)]),
            ]
        );
        assert!(!groups.is_refresh_scheduled());
    }

    #[test]
    fn invalidate_all_short_circuits() {
        let (idle, recorder, groups) = setup();
        groups.invalidate_command(CommandId(1));
        groups.invalidate_all();
        groups.invalidate_command(CommandId(2));
        idle.force_idle();
        assert_eq!(*recorder.0.lock().unwrap(), vec![Update::All]);
    }

    #[test]
    fn new_invalidation_after_refresh_schedules_again() {
        let (idle, recorder, groups) = setup();
        groups.invalidate_command(CommandId(1));
        idle.force_idle();
        groups.invalidate_command(CommandId(2));
        assert!(groups.is_refresh_scheduled());
        idle.force_idle();
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn membership_queries() {
        let (_idle, _recorder, groups) = setup();
        groups.map_command(CommandId(3), GroupId(7));
        groups.map_command(CommandId(3), GroupId(8));
        assert_eq!(groups.group_of(CommandId(3)), Some(GroupId(8)));
        assert!(groups.commands_in(GroupId(7)).is_empty());
        groups.unmap_command(CommandId(3));
        assert_eq!(groups.group_of(CommandId(3)), None);
    }
}
