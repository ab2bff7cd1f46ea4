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

//! Bluetooth communication module.
//!
//! Client side of an RFCOMM serial port profile link: connection lifecycle,
//! background receive into a ring buffer, and delimiter framing.

#[cfg(feature = "bluez")]
mod bluez;
pub mod constants;
mod connection;
mod counters;
mod receiver;
mod ring_buffer;
pub mod transport;

#[cfg(feature = "bluez")]
pub use bluez::{BluezAdapter, BluezDevice, ChannelLookup};
pub use connection::{ConnectionManager, LinkSettings};
pub use constants::SPP_UUID;
pub use counters::ByteCounters;
pub use ring_buffer::{Line, RingBuffer};
pub use transport::memory::{MemoryAdapter, MemoryPeer};
pub use transport::{Adapter, RemoteDevice};
