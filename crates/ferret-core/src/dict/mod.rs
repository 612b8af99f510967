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

//! A variant-typed dictionary used for options and other small persisted state.
//!
//! [`Dict`] maps string keys to [`Value`]s and serializes to a compact binary
//! file with `bincode`. Iteration order is unspecified; callers that need an
//! order must sort.

mod value;

pub use self::value::Value;

use crate::error::FerretError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Leading bytes of every persisted dictionary file.
const MAGIC: &[u8; 4] = b"FDIC";

/// A string-keyed map of [`Value`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dict {
    entries: HashMap<String, Value>,
}

impl Dict {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if `key` is present.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Looks up a value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Inserts or replaces a value, returning the previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    /// Removes a value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates over the entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Reads a boolean, or `default` if missing or of another type.
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    /// Reads an integer, or `default` if missing or of another type.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(Value::as_int).unwrap_or(default)
    }

    /// Reads a float (integers are widened), or `default`.
    pub fn get_float(&self, key: &str, default: f64) -> f64 {
        self.get(key).and_then(Value::as_float).unwrap_or(default)
    }

    /// Reads a string slice.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Reads an array.
    pub fn get_array(&self, key: &str) -> Option<&[Value]> {
        self.get(key).and_then(Value::as_array)
    }

    /// Reads a nested dictionary.
    pub fn get_dict(&self, key: &str) -> Option<&Dict> {
        self.get(key).and_then(Value::as_dict)
    }

    /// Encodes the dictionary to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FerretError> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?);
        Ok(bytes)
    }

    /// Decodes a dictionary produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    /// Returns [`FerretError::Decode`] for foreign or corrupt data.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FerretError> {
        let payload = bytes
            .strip_prefix(MAGIC.as_slice())
            .ok_or(bincode::error::DecodeError::Other("missing dictionary header"))?;
        let (dict, _) = bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
        Ok(dict)
    }

    /// Writes the dictionary to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), FerretError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| FerretError::io(parent, e))?;
            }
        }
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|e| FerretError::io(path, e))?;
        log::debug!("Saved {} entries to '{}'.", self.len(), path.display());
        Ok(())
    }

    /// Reads a dictionary from `path`.
    pub fn load(path: &Path) -> Result<Self, FerretError> {
        let bytes = std::fs::read(path).map_err(|e| FerretError::io(path, e))?;
        Self::from_bytes(&bytes)
    }
}

impl FromIterator<(String, Value)> for Dict {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dict {
        let mut dict = Dict::new();
        dict.set("sound", true);
        dict.set("padding", 12);
        dict.set("scale", 1.5);
        dict.set("name", "Ferret");
        dict.set(
            "recent",
            vec![Value::from("a.txt"), Value::from("b.txt")],
        );
        let mut nested = Dict::new();
        nested.set("inner", -4);
        dict.set("nested", nested);
        dict
    }

    #[test]
    fn typed_getters_fall_back_to_defaults() {
        let dict = sample();
        assert!(dict.get_bool("sound", false));
        assert!(!dict.get_bool("missing", false));
        assert_eq!(dict.get_int("padding", 0), 12);
        // Wrong type falls back.
        assert_eq!(dict.get_int("name", 99), 99);
        // Integers widen to floats.
        assert_eq!(dict.get_float("padding", 0.0), 12.0);
        assert_eq!(dict.get_str("name"), Some("Ferret"));
        assert_eq!(dict.get_array("recent").map(<[Value]>::len), Some(2));
        assert_eq!(
            dict.get_dict("nested").map(|d| d.get_int("inner", 0)),
            Some(-4)
        );
    }

    #[test]
    fn save_and_load_preserve_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("options.dat");
        let dict = sample();
        dict.save(&path).unwrap();
        let loaded = Dict::load(&path).unwrap();
        assert_eq!(loaded, dict);
    }

    #[test]
    fn foreign_bytes_are_rejected() {
        assert!(matches!(
            Dict::from_bytes(b"nope"),
            Err(FerretError::Decode(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Dict::load(&dir.path().join("absent.dat"));
        assert!(matches!(result, Err(FerretError::Io { .. })));
    }
}
