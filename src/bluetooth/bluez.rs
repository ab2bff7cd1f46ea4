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

//! BlueZ RFCOMM transport.
//!
//! By default the peer's channel is resolved by BlueZ from its SDP record:
//! a client profile is registered for the requested service and BlueZ hands
//! over the connected socket once `connect_profile` succeeds. A fixed channel
//! skips the lookup.

use anyhow::Result;
use bluer::rfcomm::{Profile, ProfileHandle, ReqError, Role, SocketAddr, Stream};
use bluer::{Address, Session};
use futures::StreamExt;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::transport::{Adapter, RemoteDevice};

/// How the RFCOMM channel of a service is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLookup {
    /// Ask BlueZ to resolve the service through SDP.
    Sdp,
    /// Connect straight to this channel.
    Fixed(u8),
}

impl From<Option<u8>> for ChannelLookup {
    fn from(channel: Option<u8>) -> Self {
        channel.map_or(Self::Sdp, Self::Fixed)
    }
}

type Profiles = Arc<Mutex<HashMap<Uuid, ProfileHandle>>>;

/// The default BlueZ adapter.
pub struct BluezAdapter {
    session: Session,
    adapter: bluer::Adapter,
    lookup: ChannelLookup,
    profiles: Profiles,
}

impl BluezAdapter {
    /// Open a BlueZ session on the default adapter.
    pub async fn new(lookup: ChannelLookup) -> Result<Self> {
        let session = Session::new().await?;
        info!("BlueZ session created");

        let adapter = session.default_adapter().await?;
        info!("Using Bluetooth adapter: {}", adapter.name());

        match lookup {
            ChannelLookup::Sdp => info!("RFCOMM channels resolved through SDP"),
            ChannelLookup::Fixed(channel) => info!("Using fixed RFCOMM channel {}", channel),
        }

        Ok(Self {
            session,
            adapter,
            lookup,
            profiles: Arc::new(Mutex::new(HashMap::new())),
        })
    }
}

impl Adapter for BluezAdapter {
    type Device = BluezDevice;

    async fn is_enabled(&self) -> io::Result<bool> {
        self.adapter.is_powered().await.map_err(io::Error::other)
    }

    async fn enable(&self) -> io::Result<()> {
        self.adapter.set_powered(true).await.map_err(io::Error::other)
    }

    fn remote_device(&self, address: &str) -> io::Result<BluezDevice> {
        let address: Address = address.parse().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid Bluetooth address: {}", address),
            )
        })?;
        let device = self.adapter.device(address).map_err(io::Error::other)?;

        Ok(BluezDevice {
            session: self.session.clone(),
            device,
            lookup: self.lookup,
            profiles: self.profiles.clone(),
        })
    }
}

/// A remote BlueZ device.
pub struct BluezDevice {
    session: Session,
    device: bluer::Device,
    lookup: ChannelLookup,
    profiles: Profiles,
}

impl BluezDevice {
    async fn connect_profile(&self, service: Uuid) -> io::Result<Stream> {
        // Registered once per service and kept for the session
        let mut profiles = self.profiles.lock().await;
        let handle = match profiles.entry(service) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let handle = self
                    .session
                    .register_profile(client_profile(service))
                    .await
                    .map_err(io::Error::other)?;
                debug!("Registered client profile for service {}", service);
                entry.insert(handle)
            }
        };

        let address = self.device.address();
        debug!("Resolving service {} on {}", service, address);

        let connect = self.device.connect_profile(&service);
        tokio::pin!(connect);
        let mut requested = false;

        loop {
            tokio::select! {
                result = &mut connect, if !requested => {
                    requested = true;
                    result.map_err(io::Error::other)?;
                }
                request = handle.next() => {
                    let Some(request) = request else {
                        return Err(io::Error::new(
                            io::ErrorKind::ConnectionAborted,
                            "profile unregistered",
                        ));
                    };
                    if request.device() != address {
                        debug!("Rejecting profile connection from {}", request.device());
                        request.reject(ReqError::Rejected);
                        continue;
                    }
                    return request.accept().map_err(io::Error::other);
                }
            }
        }
    }
}

impl RemoteDevice for BluezDevice {
    type Stream = Stream;

    async fn open_channel(&self, service: Uuid) -> io::Result<Stream> {
        match self.lookup {
            ChannelLookup::Sdp => self.connect_profile(service).await,
            ChannelLookup::Fixed(channel) => {
                let target = SocketAddr::new(self.device.address(), channel);
                debug!(
                    "Opening RFCOMM channel {} on {} for service {}",
                    channel, target.addr, service
                );
                Stream::connect(target).await
            }
        }
    }
}

fn client_profile(service: Uuid) -> Profile {
    Profile {
        uuid: service,
        role: Some(Role::Client),
        require_authentication: Some(false),
        require_authorization: Some(false),
        auto_connect: Some(false),
        ..Default::default()
    }
}
