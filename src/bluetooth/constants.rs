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

//! Serial port profile identifiers and link defaults.

use std::time::Duration;
use uuid::Uuid;

/// Standard SPP service UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Receive path defaults.
pub mod link {
    use super::Duration;

    /// Receive ring buffer capacity (8 KiB).
    pub const BUFFER_CAPACITY: usize = 8 * 1024;

    /// Scratch buffer size for a single read from the channel.
    pub const READ_CHUNK_SIZE: usize = 1024;

    /// How often a delimiter wait re-checks the buffer.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Pause before retrying a write into a full ring buffer.
    pub const BACKPRESSURE_INTERVAL: Duration = Duration::from_millis(100);

    /// Line separator used when none (or an empty one) is set.
    pub const DEFAULT_SEPARATOR: &[u8] = b"\n";
}
