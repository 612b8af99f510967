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

//! Most-recently-used list of opened items, with pinning.

use crate::dict::{Dict, Value};

/// Dictionary key holding the item paths.
pub const MRU_PATHS_KEY: &str = "MruPaths";
/// Dictionary key holding the display names.
pub const MRU_NAMES_KEY: &str = "MruNames";
/// Dictionary key holding the pinned flags.
pub const MRU_PINNED_KEY: &str = "MruPinned";
/// Default number of entries kept.
pub const DEFAULT_MRU_LIMIT: usize = 10;

/// One entry of an [`MruList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MruEntry {
    /// Path or other unique key of the item.
    pub path: String,
    /// Name shown to the user.
    pub name: String,
    /// Pinned entries are never evicted.
    pub pinned: bool,
}

/// Most-recently-used list; the front is the most recent entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MruList {
    entries: Vec<MruEntry>,
    limit: usize,
}

impl MruList {
    /// Creates an empty list holding at most `limit` unpinned-evictable entries.
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            limit: limit.max(1),
        }
    }

    /// Adds or refreshes an item at the front.
    ///
    /// An item already present is moved to the front and keeps its pinned flag
    /// (`old || pinned`). When the list grows past the limit, the least
    /// recently added unpinned entry is evicted; pinned entries never are.
    pub fn add(&mut self, path: impl Into<String>, name: impl Into<String>, pinned: bool) {
        let path = path.into();
        let name = name.into();
        let pinned = match self.position(&path) {
            Some(index) => self.entries.remove(index).pinned || pinned,
            None => pinned,
        };
        self.entries.insert(0, MruEntry { path, name, pinned });
        self.enforce_limit();
    }

    /// Sets the pinned flag of an item.
    ///
    /// ## Returns
    /// `false` if the item is not in the list.
    pub fn pin(&mut self, path: &str, pinned: bool) -> bool {
        match self.position(path) {
            Some(index) => {
                self.entries[index].pinned = pinned;
                if !pinned {
                    self.enforce_limit();
                }
                true
            }
            None => false,
        }
    }

    /// Removes an item.
    pub fn remove(&mut self, path: &str) -> Option<MruEntry> {
        self.position(path).map(|index| self.entries.remove(index))
    }

    /// Removes every entry, pinned or not.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Changes the limit and evicts as needed.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
        self.enforce_limit();
    }

    /// The configured limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks an entry up by path.
    pub fn get(&self, path: &str) -> Option<&MruEntry> {
        self.position(path).map(|index| &self.entries[index])
    }

    /// Iterates from most to least recent.
    pub fn iter(&self) -> impl Iterator<Item = &MruEntry> {
        self.entries.iter()
    }

    /// Stores the list as three parallel arrays.
    pub fn save_to(&self, dict: &mut Dict) {
        let paths = self.entries.iter().map(|e| Value::from(e.path.as_str()));
        let names = self.entries.iter().map(|e| Value::from(e.name.as_str()));
        let pinned = self.entries.iter().map(|e| Value::from(e.pinned));
        dict.set(MRU_PATHS_KEY, paths.collect::<Vec<_>>());
        dict.set(MRU_NAMES_KEY, names.collect::<Vec<_>>());
        dict.set(MRU_PINNED_KEY, pinned.collect::<Vec<_>>());
    }

    /// Replaces the contents with the arrays stored by [`save_to`](Self::save_to).
    ///
    /// Arrays of different lengths are truncated to the shortest; malformed
    /// entries are skipped.
    pub fn load_from(&mut self, dict: &Dict) {
        self.entries.clear();
        let (Some(paths), Some(names), Some(pinned)) = (
            dict.get_array(MRU_PATHS_KEY),
            dict.get_array(MRU_NAMES_KEY),
            dict.get_array(MRU_PINNED_KEY),
        ) else {
            return;
        };

        if paths.len() != names.len() || paths.len() != pinned.len() {
            log::warn!(
                "MRU arrays disagree in length ({}, {}, {}), truncating.",
                paths.len(),
                names.len(),
                pinned.len()
            );
        }

        for ((path, name), pinned) in paths.iter().zip(names).zip(pinned) {
            match (path.as_str(), name.as_str(), pinned.as_bool()) {
                (Some(path), Some(name), Some(pinned)) if self.position(path).is_none() => {
                    self.entries.push(MruEntry {
                        path: path.to_owned(),
                        name: name.to_owned(),
                        pinned,
                    });
                }
                _ => log::warn!("Skipping malformed MRU entry."),
            }
        }
        self.enforce_limit();
    }

    fn position(&self, path: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.path == path)
    }

    /// Evicts from the back, never the front entry and never a pinned one.
    fn enforce_limit(&mut self) {
        while self.entries.len() > self.limit {
            let victim = self
                .entries
                .iter()
                .enumerate()
                .skip(1)
                .rev()
                .find(|(_, e)| !e.pinned)
                .map(|(index, _)| index);
            match victim {
                Some(index) => {
                    let evicted = self.entries.remove(index);
                    log::trace!("MRU evicted '{}'.", evicted.path);
                }
                None => break,
            }
        }
    }
}

impl Default for MruList {
    fn default() -> Self {
        Self::new(DEFAULT_MRU_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(list: &MruList) -> Vec<&str> {
        list.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn re_adding_moves_to_front_and_keeps_pin() {
        let mut list = MruList::new(5);
        list.add("a", "A", true);
        list.add("b", "B", false);
        list.add("c", "C", false);
        assert_eq!(paths(&list), vec!["c", "b", "a"]);

        list.add("a", "A renamed", false);
        assert_eq!(paths(&list), vec!["a", "c", "b"]);
        let a = list.get("a").unwrap();
        assert!(a.pinned, "pinned flag is OR-ed, never cleared by add");
        assert_eq!(a.name, "A renamed");

        list.add("b", "B", true);
        assert!(list.get("b").unwrap().pinned);
    }

    #[test]
    fn eviction_skips_pinned_entries() {
        let mut list = MruList::new(3);
        list.add("old-pinned", "", true);
        list.add("x", "", false);
        list.add("y", "", false);
        list.add("z", "", false);

        // "old-pinned" is the least recent but pinned, so "x" goes.
        assert_eq!(paths(&list), vec!["z", "y", "old-pinned"]);
        assert!(list.get("x").is_none());
    }

    #[test]
    fn all_pinned_list_may_exceed_limit() {
        let mut list = MruList::new(2);
        list.add("a", "", true);
        list.add("b", "", true);
        list.add("c", "", false);
        assert_eq!(paths(&list), vec!["c", "b", "a"]);

        list.pin("a", false);
        assert_eq!(paths(&list), vec!["c", "b"]);
    }

    #[test]
    fn persists_as_parallel_arrays() {
        let mut list = MruList::new(4);
        list.add("one.txt", "One", false);
        list.add("two.txt", "Two", true);

        let mut dict = Dict::new();
        list.save_to(&mut dict);
        assert_eq!(dict.get_array(MRU_PATHS_KEY).unwrap().len(), 2);
        assert_eq!(dict.get_array(MRU_PINNED_KEY).unwrap()[0], Value::Bool(true));

        let mut restored = MruList::new(4);
        restored.load_from(&dict);
        assert_eq!(restored, list);
    }

    #[test]
    fn load_truncates_mismatched_arrays() {
        let mut dict = Dict::new();
        dict.set(MRU_PATHS_KEY, vec![Value::from("a"), Value::from("b")]);
        dict.set(MRU_NAMES_KEY, vec![Value::from("A")]);
        dict.set(MRU_PINNED_KEY, vec![Value::from(false), Value::from(true)]);

        let mut list = MruList::default();
        list.load_from(&dict);
        assert_eq!(paths(&list), vec!["a"]);
    }
}
