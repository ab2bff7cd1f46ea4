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

//! Background task draining the channel into the receive buffer.

use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::counters::ByteCounters;
use super::ring_buffer::RingBuffer;

/// How a receiver task ended.
#[derive(Debug)]
pub enum ReceiverExit {
    /// Stopped by its owner.
    Shutdown,
    /// The channel failed or the peer closed it.
    ConnectionLost(io::Error),
}

/// Tuning for the receive loop.
#[derive(Debug, Clone, Copy)]
pub struct ReceiverSettings {
    pub chunk_size: usize,
    pub backpressure_interval: Duration,
}

/// Owned handle to a running receiver task.
///
/// Dropping the handle also stops the task.
#[derive(Debug)]
pub struct ReceiverHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<ReceiverExit>,
}

impl ReceiverHandle {
    /// Clear `buffer` and start draining `reader` into it on `runtime`.
    pub fn spawn<R>(
        runtime: &Handle,
        reader: R,
        buffer: Arc<RingBuffer>,
        counters: Arc<ByteCounters>,
        settings: ReceiverSettings,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        buffer.clear();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = runtime.spawn(run(reader, buffer, counters, settings, shutdown_rx));

        info!("Receiver started");
        Self {
            shutdown: Some(shutdown_tx),
            join,
        }
    }

    /// Whether the loop has already exited on its own.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the loop to stop and wait for it.
    ///
    /// A loop that already ended keeps its original exit reason.
    pub async fn stop(mut self) -> ReceiverExit {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        match (&mut self.join).await {
            Ok(exit) => exit,
            Err(e) => ReceiverExit::ConnectionLost(io::Error::other(e)),
        }
    }
}

async fn run<R>(
    mut reader: R,
    buffer: Arc<RingBuffer>,
    counters: Arc<ByteCounters>,
    settings: ReceiverSettings,
    mut shutdown: oneshot::Receiver<()>,
) -> ReceiverExit
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; settings.chunk_size.max(1)];

    loop {
        // No read timeout: only shutdown or a channel error ends the wait.
        let read = tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!("Receiver stopped");
                return ReceiverExit::Shutdown;
            }
            read = reader.read(&mut chunk) => read,
        };

        let count = match read {
            Ok(0) => {
                warn!("Channel closed by remote");
                return ReceiverExit::ConnectionLost(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "channel closed by remote",
                ));
            }
            Ok(count) => count,
            Err(e) => {
                warn!("Channel read failed: {}", e);
                return ReceiverExit::ConnectionLost(e);
            }
        };

        counters.add_received(count as u64);
        debug!("Received {} bytes", count);

        let mut written = buffer.write(&chunk[..count]);
        while written < count {
            // Buffer full: wait for the consumer, but never past shutdown.
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Receiver stopped with {} bytes undelivered", count - written);
                    return ReceiverExit::Shutdown;
                }
                _ = tokio::time::sleep(settings.backpressure_interval) => {}
            }
            written += buffer.write(&chunk[written..count]);
        }
    }
}
