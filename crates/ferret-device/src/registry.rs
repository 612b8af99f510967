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

//! Tracks the live resources of a device.

use ferret_core::FerretError;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// A resource owned by a device that must be rebuilt after device loss.
pub trait DeviceChild {
    /// Rebuilds the native resources from the device's current handle.
    ///
    /// Must not assume that any previous state is valid, and must be safe to
    /// call repeatedly.
    fn reset(&mut self) -> Result<(), FerretError>;

    /// Returns `true` if the child is usable against the current device handle.
    fn is_valid(&self) -> bool;

    /// A short label for logs.
    fn label(&self) -> &str {
        "device child"
    }
}

/// Registration number of a child within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildId(pub u64);

type ChildRef = Rc<RefCell<dyn DeviceChild>>;

#[derive(Default)]
struct Children {
    entries: Vec<(ChildId, Weak<RefCell<dyn DeviceChild>>)>,
    next_id: u64,
}

/// The set of children registered with a device, in registration order.
///
/// Cloning yields another handle to the same set.
#[derive(Clone, Default)]
pub struct ChildRegistry {
    children: Rc<RefCell<Children>>,
}

impl ChildRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `child`. It stays registered until the returned guard drops.
    pub fn register(&self, child: &ChildRef) -> ChildRegistration {
        let mut children = self.children.borrow_mut();
        let id = ChildId(children.next_id);
        children.next_id += 1;
        children.entries.push((id, Rc::downgrade(child)));
        ChildRegistration {
            children: Rc::downgrade(&self.children),
            id,
        }
    }

    /// The live children, in registration order.
    pub fn live(&self) -> Vec<ChildRef> {
        self.children
            .borrow()
            .entries
            .iter()
            .filter_map(|(_, child)| child.upgrade())
            .collect()
    }

    /// Number of registered children.
    pub fn len(&self) -> usize {
        self.children.borrow().entries.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.children.borrow().entries.is_empty()
    }

    /// Resets every live child once.
    ///
    /// ## Returns
    /// The number of children whose reset failed.
    pub fn reset_all(&self) -> usize {
        let mut failures = 0;
        for entry in self.live() {
            let Ok(mut child) = entry.try_borrow_mut() else {
                log::error!("A device child is in use during reset, skipping it.");
                failures += 1;
                continue;
            };
            if let Err(e) = child.reset() {
                log::warn!("Failed to reset '{}': {e}", child.label());
                failures += 1;
            }
        }
        failures
    }
}

impl std::fmt::Debug for ChildRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildRegistry")
            .field("children", &self.len())
            .finish()
    }
}

/// Keeps a child registered; dropping it deregisters the child.
#[derive(Debug)]
pub struct ChildRegistration {
    children: Weak<RefCell<Children>>,
    id: ChildId,
}

impl ChildRegistration {
    /// The registration number.
    pub fn id(&self) -> ChildId {
        self.id
    }
}

impl Drop for ChildRegistration {
    fn drop(&mut self) {
        if let Some(children) = self.children.upgrade() {
            children.borrow_mut().entries.retain(|(id, _)| *id != self.id);
        }
    }
}
