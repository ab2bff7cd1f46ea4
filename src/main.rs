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

//! SPP serial terminal.
//!
//! Connects to a serial port profile device, prints every received frame and
//! sends each line typed on stdin followed by the configured delimiter.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spp_link::bluetooth::{BluezAdapter, ChannelLookup};
use spp_link::config::Config;
use spp_link::{ConnectionManager, Line, LinkSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spp_link=info".parse()?),
        )
        .init();

    info!("Starting spp-link v{}...", env!("CARGO_PKG_VERSION"));

    let config = Config::load()?;
    info!("Configuration loaded");

    let address = std::env::args()
        .nth(1)
        .or_else(|| config.bluetooth.address.clone())
        .ok_or_else(|| anyhow!("usage: spp-link <ADDRESS> (or set bluetooth.address)"))?;

    let adapter = BluezAdapter::new(ChannelLookup::from(config.bluetooth.rfcomm_channel)).await?;
    let manager = Arc::new(ConnectionManager::new(
        adapter,
        LinkSettings::from(&config),
        Handle::current(),
    ));
    manager.connect(&address).await?;

    let delimiter = config.link.delimiter.clone().into_bytes();

    // Print incoming frames until the link goes away
    let rx_manager = manager.clone();
    let rx_delimiter = delimiter.clone();
    let printer = tokio::spawn(async move {
        while let Some(line) = rx_manager.receive_until_delimiter(&rx_delimiter).await {
            if let Line::Overflow(_) = line {
                warn!("Frame exceeded the receive buffer; output may be truncated");
            }
            println!("{}", String::from_utf8_lossy(line.as_bytes()));
        }
        info!("Receive loop ended");
    });

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(text) = line? else {
                    info!("End of input");
                    break;
                };
                let mut frame = text.into_bytes();
                frame.extend_from_slice(&delimiter);
                if let Err(e) = manager.send(&frame).await {
                    error!("Send failed: {}", e);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    manager.cancel_pending_receive();
    manager.close().await;
    if let Err(e) = printer.await {
        error!("Receive loop failed: {}", e);
    }

    info!(
        "Sent {} bytes, received {} bytes, connection held {}s",
        manager.bytes_sent(),
        manager.bytes_received(),
        manager.connection_hold_seconds().await
    );
    Ok(())
}
