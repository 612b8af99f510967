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

//! Defines the error type shared by the Ferret crates and the invariant-check macro.

use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced by the Ferret utility core.
///
/// Most of the core reports recoverable problems by logging and skipping the
/// operation; this type covers the cases that must reach a caller.
#[derive(Debug, thiserror::Error)]
pub enum FerretError {
    /// An underlying I/O operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// The originating I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A value could not be encoded for persistence.
    #[error("Failed to encode data: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    /// Persisted bytes could not be decoded.
    #[error("Failed to decode data: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    /// An event timer was requested with an unusable interval.
    #[error("Invalid event timer interval: {0:?}")]
    InvalidTimerInterval(Duration),
    /// The native device handle was lost and must be reset.
    #[error("Device '{0}' is lost")]
    DeviceLost(String),
    /// The device was destroyed and can no longer be used.
    #[error("Device '{0}' was destroyed")]
    DeviceDestroyed(String),
    /// A backend (graphics, audio) call failed.
    #[error("Backend error: {0}")]
    Backend(String),
    /// Application startup could not complete.
    #[error("Startup failed: {0}")]
    Startup(String),
    /// None of the candidate log file names could be opened.
    #[error("No usable log file in '{0}'")]
    NoLogFile(PathBuf),
}

impl FerretError {
    /// Wraps an I/O error together with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Checks a programming invariant without aborting.
///
/// When the condition is false an error is logged (with the location) and
/// execution continues. The macro evaluates to the condition so callers can
/// bail out with a default value:
///
/// ```rust
/// use ferret_core::check_invariant;
///
/// fn halve(count: u32) -> u32 {
///     if !check_invariant!(count % 2 == 0, "odd count {count}") {
///         return 0;
///     }
///     count / 2
/// }
///
/// assert_eq!(halve(4), 2);
/// assert_eq!(halve(3), 0);
/// ```
#[macro_export]
macro_rules! check_invariant {
    ($cond:expr $(,)?) => {
        $crate::check_invariant!($cond, "{}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {{
        let ok: bool = $cond;
        if !ok {
            $crate::__private_log::error!(
                "Invariant violated at {}:{}: {}",
                file!(),
                line!(),
                format_args!($($arg)+)
            );
        }
        ok
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_macro_returns_condition() {
        assert!(check_invariant!(1 + 1 == 2));
        assert!(!check_invariant!(1 + 1 == 3, "math is broken: {}", 3));
    }

    #[test]
    fn io_error_display_names_the_path() {
        let err = FerretError::io(
            "options.dat",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        let message = err.to_string();
        assert!(message.contains("options.dat"), "got: {message}");
        assert!(message.contains("missing"), "got: {message}");
    }
}
