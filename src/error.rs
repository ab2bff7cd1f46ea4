// Copyright 2026 Daniel Pelikan
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

//! Link error types.

use std::io;
use thiserror::Error;

pub type SppResult<T> = Result<T, SppError>;

/// Errors surfaced by the serial link.
///
/// Transport I/O failures are always wrapped in one of these variants; raw
/// `io::Error`s never cross the send/receive surface on their own.
#[derive(Error, Debug)]
pub enum SppError {
    /// No live connection.
    #[error("Not connected")]
    NotConnected,

    /// The local radio is off and enabling it was not allowed or failed.
    #[error("Bluetooth radio is disabled")]
    RadioDisabled,

    /// Opening the channel failed; nothing was left half-open.
    #[error("Failed to connect to {address}: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// I/O failed on an established connection, which has been closed.
    #[error("Connection lost: {0}")]
    ConnectionLost(#[source] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_failed_message() {
        let err = SppError::ConnectFailed {
            address: "00:11:22:33:44:55".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert_eq!(
            err.to_string(),
            "Failed to connect to 00:11:22:33:44:55: refused"
        );
    }

    #[test]
    fn test_connection_lost_keeps_source() {
        let err = SppError::ConnectionLost(io::Error::from(io::ErrorKind::BrokenPipe));
        let source = std::error::Error::source(&err).unwrap();
        let source = source.downcast_ref::<io::Error>().unwrap();
        assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
    }
}
