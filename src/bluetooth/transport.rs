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

//! Capabilities the link needs from the Bluetooth stack.

use std::future::Future;
use std::io;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

/// Local Bluetooth adapter.
pub trait Adapter: Send + Sync + 'static {
    type Device: RemoteDevice;

    /// Whether the radio is powered.
    fn is_enabled(&self) -> impl Future<Output = io::Result<bool>> + Send;

    /// Power the radio on.
    fn enable(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Resolve a handle for the peer at `address`.
    fn remote_device(&self, address: &str) -> io::Result<Self::Device>;
}

/// A peer that offers services over RFCOMM.
pub trait RemoteDevice: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Open a reliable byte-stream channel to `service`.
    ///
    /// Completes once the handshake finished or failed.
    fn open_channel(
        &self,
        service: Uuid,
    ) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

pub mod memory {
    //! In-process loopback transport.
    //!
    //! Every registered peer receives the far end of each channel opened to
    //! its address, which makes it usable as a scripted device in tests.

    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;
    use tracing::debug;
    use uuid::Uuid;

    use super::{Adapter, RemoteDevice};
    use crate::bluetooth::constants::SPP_UUID;

    const PIPE_CAPACITY: usize = 64 * 1024;

    #[derive(Debug)]
    struct Shared {
        enabled: AtomicBool,
        peers: Mutex<HashMap<String, mpsc::UnboundedSender<DuplexStream>>>,
        channels_opened: AtomicUsize,
    }

    /// Adapter whose peers live in the same process.
    #[derive(Debug, Clone)]
    pub struct MemoryAdapter {
        shared: Arc<Shared>,
    }

    impl MemoryAdapter {
        /// Create a powered adapter with no peers.
        pub fn new() -> Self {
            Self {
                shared: Arc::new(Shared {
                    enabled: AtomicBool::new(true),
                    peers: Mutex::new(HashMap::new()),
                    channels_opened: AtomicUsize::new(0),
                }),
            }
        }

        pub fn set_enabled(&self, enabled: bool) {
            self.shared.enabled.store(enabled, Ordering::SeqCst);
        }

        /// Register a peer reachable at `address`, replacing any previous one.
        pub fn add_peer(&self, address: &str) -> MemoryPeer {
            let (tx, rx) = mpsc::unbounded_channel();
            self.shared.peers.lock().insert(address.to_string(), tx);
            MemoryPeer { incoming: rx }
        }

        /// Number of channels successfully opened so far.
        pub fn channels_opened(&self) -> usize {
            self.shared.channels_opened.load(Ordering::SeqCst)
        }
    }

    impl Default for MemoryAdapter {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Adapter for MemoryAdapter {
        type Device = MemoryDevice;

        async fn is_enabled(&self) -> io::Result<bool> {
            Ok(self.shared.enabled.load(Ordering::SeqCst))
        }

        async fn enable(&self) -> io::Result<()> {
            self.shared.enabled.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn remote_device(&self, address: &str) -> io::Result<MemoryDevice> {
            Ok(MemoryDevice {
                address: address.to_string(),
                shared: self.shared.clone(),
            })
        }
    }

    /// Handle to a loopback peer.
    #[derive(Debug)]
    pub struct MemoryDevice {
        address: String,
        shared: Arc<Shared>,
    }

    impl RemoteDevice for MemoryDevice {
        type Stream = DuplexStream;

        async fn open_channel(&self, service: Uuid) -> io::Result<DuplexStream> {
            if service != SPP_UUID {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("service {} not offered", service),
                ));
            }

            let peer = self.shared.peers.lock().get(&self.address).cloned();
            let peer = peer.ok_or_else(|| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "no peer at address")
            })?;

            let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
            peer.send(remote).map_err(|_| {
                io::Error::new(io::ErrorKind::ConnectionRefused, "peer gone")
            })?;

            self.shared.channels_opened.fetch_add(1, Ordering::SeqCst);
            debug!("Loopback channel opened to {}", self.address);
            Ok(local)
        }
    }

    /// The device side of a loopback peer.
    #[derive(Debug)]
    pub struct MemoryPeer {
        incoming: mpsc::UnboundedReceiver<DuplexStream>,
    }

    impl MemoryPeer {
        /// Wait for the next channel opened to this peer.
        pub async fn accept(&mut self) -> Option<DuplexStream> {
            self.incoming.recv().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryAdapter;
    use super::*;
    use crate::bluetooth::constants::SPP_UUID;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_loopback_channel() {
        let adapter = MemoryAdapter::new();
        let mut peer = adapter.add_peer("AA:BB:CC:DD:EE:FF");

        let device = adapter.remote_device("AA:BB:CC:DD:EE:FF").unwrap();
        let mut local = device.open_channel(SPP_UUID).await.unwrap();
        let mut remote = peer.accept().await.unwrap();

        local.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        assert_eq!(adapter.channels_opened(), 1);
    }

    #[tokio::test]
    async fn test_unknown_peer_refused() {
        let adapter = MemoryAdapter::new();
        let device = adapter.remote_device("00:00:00:00:00:01").unwrap();

        let err = device.open_channel(SPP_UUID).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert_eq!(adapter.channels_opened(), 0);
    }

    #[tokio::test]
    async fn test_wrong_service_not_found() {
        let adapter = MemoryAdapter::new();
        let _peer = adapter.add_peer("AA:BB:CC:DD:EE:FF");
        let device = adapter.remote_device("AA:BB:CC:DD:EE:FF").unwrap();

        let err = device.open_channel(Uuid::nil()).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
