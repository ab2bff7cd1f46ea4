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

//! SPP client connection lifecycle.

use chrono::{DateTime, Utc};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::constants::{link, SPP_UUID};
use super::counters::ByteCounters;
use super::receiver::{ReceiverExit, ReceiverHandle, ReceiverSettings};
use super::ring_buffer::{Line, RingBuffer};
use super::transport::{Adapter, RemoteDevice};
use crate::error::{SppError, SppResult};

/// Sizing and timing of the receive path.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Receive ring buffer capacity in bytes.
    pub buffer_capacity: usize,
    /// Size of a single read from the channel.
    pub read_chunk_size: usize,
    /// Poll period of [`ConnectionManager::receive_until_delimiter`].
    pub poll_interval: Duration,
    /// Retry period when the receive buffer is full.
    pub backpressure_interval: Duration,
    /// Power the radio on during connect instead of failing.
    pub enable_radio: bool,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: link::BUFFER_CAPACITY,
            read_chunk_size: link::READ_CHUNK_SIZE,
            poll_interval: link::POLL_INTERVAL,
            backpressure_interval: link::BACKPRESSURE_INTERVAL,
            enable_radio: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Timestamp {
    at: Instant,
    wall: DateTime<Utc>,
}

impl Timestamp {
    fn now() -> Self {
        Self {
            at: Instant::now(),
            wall: Utc::now(),
        }
    }
}

/// A live channel. Handle and both endpoints exist together.
struct Connection<D: RemoteDevice> {
    address: String,
    device: D,
    /// Output endpoint, locked per send so the control lock stays free.
    writer: Arc<Mutex<WriteHalf<D::Stream>>>,
    /// Set once the connection is closing; aborts sends in flight.
    closing: watch::Sender<bool>,
    /// Input endpoint until the receiver takes it over.
    reader: Option<ReadHalf<D::Stream>>,
    receiver: Option<ReceiverHandle>,
}

/// State guarded by the control lock.
struct ControlState<D: RemoteDevice> {
    connection: Option<Connection<D>>,
    established: Option<Timestamp>,
    closed: Option<Timestamp>,
}

/// Client side of a single SPP serial link.
///
/// Control operations (connect, close, state queries) serialize on one lock.
/// A send only holds it to look up the output endpoint; the write itself
/// runs under the endpoint's own lock and is aborted by [`close`](Self::close).
/// Received data flows through a [`RingBuffer`] with its own lock.
pub struct ConnectionManager<A: Adapter> {
    adapter: A,
    runtime: Handle,
    settings: LinkSettings,
    control: Mutex<ControlState<A::Device>>,
    buffer: Arc<RingBuffer>,
    counters: Arc<ByteCounters>,
    cancel_receive: AtomicBool,
}

impl<A: Adapter> ConnectionManager<A> {
    /// Create a disconnected manager. Receiver tasks are spawned on `runtime`.
    pub fn new(adapter: A, settings: LinkSettings, runtime: Handle) -> Self {
        Self {
            adapter,
            runtime,
            buffer: Arc::new(RingBuffer::new(settings.buffer_capacity)),
            counters: Arc::new(ByteCounters::new()),
            settings,
            control: Mutex::new(ControlState {
                connection: None,
                established: None,
                closed: None,
            }),
            cancel_receive: AtomicBool::new(false),
        }
    }

    /// Create a manager spawning on the runtime of the caller.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn with_current_runtime(adapter: A, settings: LinkSettings) -> Self {
        Self::new(adapter, settings, Handle::current())
    }

    /// Open an SPP channel to `address`.
    ///
    /// An existing connection is closed first. On failure every partially
    /// acquired resource is released and the manager stays disconnected.
    pub async fn connect(&self, address: &str) -> SppResult<()> {
        self.ensure_radio(address).await?;

        let mut state = self.control.lock().await;
        if state.connection.is_some() {
            info!("Replacing connection before connecting to {}", address);
            self.close_locked(&mut state).await;
        }

        info!("Connecting to {}...", address);
        let connect_failed = |source: io::Error| SppError::ConnectFailed {
            address: address.to_string(),
            source,
        };

        let device = self.adapter.remote_device(address).map_err(connect_failed)?;
        let stream = device.open_channel(SPP_UUID).await.map_err(connect_failed)?;
        let (reader, writer) = tokio::io::split(stream);
        let (closing, _) = watch::channel(false);

        state.connection = Some(Connection {
            address: address.to_string(),
            device,
            writer: Arc::new(Mutex::new(writer)),
            closing,
            reader: Some(reader),
            receiver: None,
        });
        state.established = Some(Timestamp::now());
        state.closed = None;

        info!("Connected to {}", address);
        Ok(())
    }

    async fn ensure_radio(&self, address: &str) -> SppResult<()> {
        let enabled = self
            .adapter
            .is_enabled()
            .await
            .map_err(|source| SppError::ConnectFailed {
                address: address.to_string(),
                source,
            })?;
        if enabled {
            return Ok(());
        }

        if !self.settings.enable_radio {
            warn!("Bluetooth radio is off");
            return Err(SppError::RadioDisabled);
        }

        info!("Powering on Bluetooth radio...");
        self.adapter.enable().await.map_err(|e| {
            warn!("Failed to power on radio: {}", e);
            SppError::RadioDisabled
        })
    }

    /// Close the connection. Does nothing when already disconnected.
    pub async fn close(&self) {
        let mut state = self.control.lock().await;
        self.close_locked(&mut state).await;
    }

    /// Tear down output, input, then the channel handle, ignoring errors.
    async fn close_locked(&self, state: &mut ControlState<A::Device>) {
        let Some(connection) = state.connection.take() else {
            return;
        };
        let Connection {
            address,
            device,
            writer,
            closing,
            reader,
            receiver,
        } = connection;

        closing.send_replace(true);
        if let Err(e) = writer.lock().await.shutdown().await {
            warn!("Error closing output stream: {}", e);
        }
        drop(writer);

        if let Some(receiver) = receiver {
            if let ReceiverExit::ConnectionLost(e) = receiver.stop().await {
                warn!("Receiver ended with: {}", e);
            }
        }
        drop(reader);
        drop(device);

        state.closed = Some(Timestamp::now());
        info!("Connection to {} closed", address);
    }

    /// Close the connection if its receiver died on a channel error.
    async fn reap_lost(&self, state: &mut ControlState<A::Device>) {
        let lost = state
            .connection
            .as_ref()
            .and_then(|c| c.receiver.as_ref())
            .is_some_and(ReceiverHandle::is_finished);

        if lost {
            warn!("Connection lost");
            self.close_locked(state).await;
        }
    }

    /// Whether a channel is open.
    pub async fn is_connected(&self) -> bool {
        let mut state = self.control.lock().await;
        self.reap_lost(&mut state).await;
        state.connection.is_some()
    }

    /// Address of the connected peer.
    pub async fn address(&self) -> Option<String> {
        let mut state = self.control.lock().await;
        self.reap_lost(&mut state).await;
        state.connection.as_ref().map(|c| c.address.clone())
    }

    /// Write `data` to the peer.
    ///
    /// Returns the number of bytes sent. A write failure closes the
    /// connection and yields [`SppError::ConnectionLost`], as does a
    /// [`close`](Self::close) racing a write the peer is not draining.
    pub async fn send(&self, data: &[u8]) -> SppResult<usize> {
        let (writer, closing) = {
            let mut state = self.control.lock().await;
            self.reap_lost(&mut state).await;

            let connection = state.connection.as_ref().ok_or(SppError::NotConnected)?;
            (connection.writer.clone(), connection.closing.subscribe())
        };

        // The write runs outside the control lock
        let result = tokio::select! {
            biased;
            _ = wait_closed(closing) => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed during send",
            )),
            result = async {
                let mut writer = writer.lock().await;
                write_all_flush(&mut *writer, data).await
            } => result,
        };

        match result {
            Ok(()) => {
                self.counters.add_sent(data.len() as u64);
                debug!("Sent {} bytes", data.len());
                Ok(data.len())
            }
            Err(e) => {
                warn!("Send failed: {}", e);
                let mut state = self.control.lock().await;
                let current = state
                    .connection
                    .as_ref()
                    .is_some_and(|c| Arc::ptr_eq(&c.writer, &writer));
                if current {
                    self.close_locked(&mut state).await;
                }
                Err(SppError::ConnectionLost(e))
            }
        }
    }

    /// Start the receiver if needed. False when not connected.
    async fn ensure_receiver(&self) -> bool {
        let mut state = self.control.lock().await;
        self.reap_lost(&mut state).await;

        let Some(connection) = state.connection.as_mut() else {
            return false;
        };
        if let Some(reader) = connection.reader.take() {
            connection.receiver = Some(ReceiverHandle::spawn(
                &self.runtime,
                reader,
                self.buffer.clone(),
                self.counters.clone(),
                ReceiverSettings {
                    chunk_size: self.settings.read_chunk_size,
                    backpressure_interval: self.settings.backpressure_interval,
                },
            ));
        }
        true
    }

    /// Take whatever has been received so far without waiting.
    ///
    /// The first call on a connection starts the background receiver.
    /// Returns `None` when disconnected or nothing is buffered.
    pub async fn receive_available(&self) -> Option<Vec<u8>> {
        if !self.ensure_receiver().await {
            return None;
        }
        self.buffer.read_all()
    }

    /// Wait for the next frame terminated by `delimiter`.
    ///
    /// Returns `None` when the connection drops or
    /// [`cancel_pending_receive`](Self::cancel_pending_receive) is called
    /// during the wait. A full buffer without a delimiter yields
    /// [`Line::Overflow`].
    pub async fn receive_until_delimiter(&self, delimiter: &[u8]) -> Option<Line> {
        if !self.ensure_receiver().await {
            return None;
        }

        self.cancel_receive.store(false, Ordering::SeqCst);
        self.buffer.set_separator(delimiter);

        while self.is_connected().await {
            if self.cancel_receive.load(Ordering::SeqCst) {
                debug!("Pending receive cancelled");
                return None;
            }
            if let Some(line) = self.buffer.readline(false) {
                if line.is_overflow() {
                    warn!("Returning {} bytes without delimiter", line.as_bytes().len());
                }
                return Some(line);
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        None
    }

    /// Abort a [`receive_until_delimiter`](Self::receive_until_delimiter)
    /// wait in progress. Safe to call from any thread.
    pub fn cancel_pending_receive(&self) {
        self.cancel_receive.store(true, Ordering::SeqCst);
    }

    pub fn bytes_received(&self) -> u64 {
        self.counters.received()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.counters.sent()
    }

    /// Bytes waiting in the receive buffer.
    pub fn buffered_byte_count(&self) -> usize {
        self.buffer.len()
    }

    /// Seconds the current or last connection has been held.
    ///
    /// Zero before the first connection; frozen once closed.
    pub async fn connection_hold_seconds(&self) -> u64 {
        let state = self.control.lock().await;
        match (state.established, state.closed) {
            (None, _) => 0,
            (Some(established), None) => established.at.elapsed().as_secs(),
            (Some(established), Some(closed)) => {
                closed.at.saturating_duration_since(established.at).as_secs()
            }
        }
    }

    /// Wall-clock time the current or last connection was established.
    pub async fn established_at(&self) -> Option<DateTime<Utc>> {
        self.control.lock().await.established.map(|t| t.wall)
    }

    /// Wall-clock time the last connection was closed.
    pub async fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.control.lock().await.closed.map(|t| t.wall)
    }
}

/// Resolves once the connection starts closing or is gone.
async fn wait_closed(mut closing: watch::Receiver<bool>) {
    let _ = closing.wait_for(|closed| *closed).await;
}

async fn write_all_flush<W>(writer: &mut W, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(data).await?;
    writer.flush().await
}
