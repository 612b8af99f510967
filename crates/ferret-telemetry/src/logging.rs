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

//! Installs the `log` backend.
//!
//! Records go to a UTF-16 log file (with BOM) and optionally to stderr. The
//! file is the first usable name among `log.txt`, `log1.txt` … `log15.txt`: a
//! name is usable if it does not exist yet, or if the old file can be deleted.
//! A second running instance therefore falls through to the next name instead
//! of fighting over a locked file.

use ferret_core::FerretError;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Number of candidate log file names.
pub const MAX_LOG_FILES: usize = 16;

/// UTF-16 little-endian byte order mark.
const UTF16_LE_BOM: [u8; 2] = [0xFF, 0xFE];

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory receiving the log file.
    pub directory: PathBuf,
    /// Default level; `RUST_LOG` overrides it.
    pub level: log::LevelFilter,
    /// Also write records to stderr.
    pub console: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            level: log::LevelFilter::Info,
            console: cfg!(debug_assertions),
        }
    }
}

/// Returns the file name of candidate `index`.
pub fn log_file_name(index: usize) -> String {
    if index == 0 {
        "log.txt".to_owned()
    } else {
        format!("log{index}.txt")
    }
}

/// Opens the first usable log file in `directory`.
///
/// # Errors
/// [`FerretError::NoLogFile`] if all candidates are taken, or
/// [`FerretError::Io`] if the directory cannot be created.
pub fn open_log_file(directory: &Path) -> Result<(File, PathBuf), FerretError> {
    std::fs::create_dir_all(directory).map_err(|e| FerretError::io(directory, e))?;

    for index in 0..MAX_LOG_FILES {
        let path = directory.join(log_file_name(index));
        if path.exists() && std::fs::remove_file(&path).is_err() {
            continue;
        }
        if let Ok(file) = OpenOptions::new().write(true).create_new(true).open(&path) {
            return Ok((file, path));
        }
    }

    Err(FerretError::NoLogFile(directory.to_path_buf()))
}

/// Re-encodes UTF-8 text as UTF-16LE, writing a BOM first.
///
/// Multi-byte characters split across `write` calls are held back until
/// complete.
#[derive(Debug)]
pub struct Utf16Writer<W: Write> {
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> Utf16Writer<W> {
    /// Wraps `inner` and writes the byte order mark.
    pub fn new(mut inner: W) -> io::Result<Self> {
        inner.write_all(&UTF16_LE_BOM)?;
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    /// Unwraps the inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }

    fn encode_pending(&mut self) -> io::Result<()> {
        let mut text = String::new();
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(valid) => {
                    text.push_str(valid);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid_end = consumed + e.valid_up_to();
                    // The prefix was just validated.
                    text.push_str(&String::from_utf8_lossy(&self.pending[consumed..valid_end]));
                    match e.error_len() {
                        Some(bad) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            consumed = valid_end + bad;
                        }
                        None => {
                            consumed = valid_end;
                            break;
                        }
                    }
                }
            }
        }
        self.pending.drain(..consumed);

        let bytes: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        self.inner.write_all(&bytes)
    }
}

impl<W: Write> Write for Utf16Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        self.encode_pending()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Fans formatted records out to the log file and stderr.
struct LogSink {
    file: Utf16Writer<File>,
    console: bool,
}

impl Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.console {
            // Console output is best effort.
            let _ = io::stderr().write_all(buf);
        }
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.console {
            let _ = io::stderr().flush();
        }
        self.file.flush()
    }
}

/// Installs the global logger writing to a rotated log file.
///
/// If a logger is already installed (tests, embedding hosts) the existing one
/// is kept and a warning is logged through it.
///
/// ## Returns
/// The path of the log file that was opened.
pub fn init_logging(config: &LogConfig) -> Result<PathBuf, FerretError> {
    let (file, path) = open_log_file(&config.directory)?;
    let file = Utf16Writer::new(file).map_err(|e| FerretError::io(&path, e))?;

    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(config.level)
        .parse_env(env_logger::Env::default())
        .format_timestamp_millis()
        .target(env_logger::Target::Pipe(Box::new(LogSink {
            file,
            console: config.console,
        })));

    match builder.try_init() {
        Ok(()) => log::info!("Logging to '{}'.", path.display()),
        Err(e) => log::warn!("Logger already installed ({e}); '{}' stays empty.", path.display()),
    }
    Ok(path)
}

/// Installs a stderr-only logger, ignoring an already installed one.
pub fn init_console_logging(level: log::LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_env(env_logger::Env::default())
        .format_timestamp_millis()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_utf16(bytes: &[u8]) -> String {
        assert_eq!(&bytes[..2], &UTF16_LE_BOM);
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units).unwrap()
    }

    #[test]
    fn candidate_names() {
        assert_eq!(log_file_name(0), "log.txt");
        assert_eq!(log_file_name(1), "log1.txt");
        assert_eq!(log_file_name(15), "log15.txt");
    }

    #[test]
    fn writer_emits_bom_and_utf16() {
        let mut writer = Utf16Writer::new(Vec::new()).unwrap();
        writer.write_all("héllo\n".as_bytes()).unwrap();
        assert_eq!(decode_utf16(&writer.into_inner()), "héllo\n");
    }

    #[test]
    fn writer_handles_split_characters() {
        let mut writer = Utf16Writer::new(Vec::new()).unwrap();
        let bytes = "€!".as_bytes();
        writer.write_all(&bytes[..1]).unwrap();
        writer.write_all(&bytes[1..2]).unwrap();
        writer.write_all(&bytes[2..]).unwrap();
        assert_eq!(decode_utf16(&writer.into_inner()), "€!");
    }

    #[test]
    fn writer_replaces_invalid_bytes() {
        let mut writer = Utf16Writer::new(Vec::new()).unwrap();
        writer.write_all(&[b'a', 0xFF, b'b']).unwrap();
        assert_eq!(decode_utf16(&writer.into_inner()), "a\u{FFFD}b");
    }

    #[test]
    fn open_log_file_reuses_deletable_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("log.txt"), b"stale").unwrap();

        let (_file, path) = open_log_file(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("log.txt"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn open_log_file_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let (_file, path) = open_log_file(&nested).unwrap();
        assert!(path.starts_with(&nested));
    }
}
