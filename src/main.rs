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

//! spp-link console

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spp_link::bluetooth::BluezAdapter;
use spp_link::config::Config;
use spp_link::{DeviceDescriptor, LinkManager, Message, PermissionGate};

/// A line typed at the console.
#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Send(String),
    Scan,
    Bonded,
    Connect(Option<String>),
    Reconnect,
    Disconnect,
    Clear,
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    fn parse(line: &str) -> Option<Self> {
        let Some(rest) = line.strip_prefix('/') else {
            return (!line.is_empty()).then(|| ConsoleCommand::Send(line.to_string()));
        };

        let mut parts = rest.split_whitespace();
        let command = match parts.next()? {
            "scan" => ConsoleCommand::Scan,
            "bonded" => ConsoleCommand::Bonded,
            "connect" => ConsoleCommand::Connect(parts.next().map(str::to_string)),
            "reconnect" => ConsoleCommand::Reconnect,
            "disconnect" => ConsoleCommand::Disconnect,
            "clear" => ConsoleCommand::Clear,
            "status" => ConsoleCommand::Status,
            "help" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            _ => return None,
        };
        Some(command)
    }
}

const HELP: &str = "\
text          send text to the device
/scan         discover nearby devices
/bonded       list bonded devices
/connect [p]  find and connect by name prefix
/reconnect    reconnect to the last target
/disconnect   close the session (clears the log)
/clear        clear the log
/status       print the link state
/quit         disconnect and exit";

fn print_devices(devices: &[DeviceDescriptor]) {
    if devices.is_empty() {
        println!("(no devices)");
    }
    for device in devices {
        let bonded = if device.bonded { " [bonded]" } else { "" };
        println!("{}  {}{}", device.id, device.name, bonded);
    }
}

/// Run one console command. Returns `false` to quit.
async fn run_command(
    manager: &LinkManager,
    config: &Config,
    prefix: &str,
    command: ConsoleCommand,
) -> Result<bool> {
    match command {
        ConsoleCommand::Send(text) => {
            let payload = format!("{}{}", text, config.session.line_ending);
            if !manager.send(payload.as_bytes()).await {
                warn!(
                    "Not sent: {}",
                    manager.last_error().unwrap_or_default()
                );
            }
        }
        ConsoleCommand::Scan => match manager.discover_devices().await {
            Ok(devices) => print_devices(&devices),
            Err(e) => error!("Discovery failed: {}", e),
        },
        ConsoleCommand::Bonded => match manager.list_bonded_devices().await {
            Ok(devices) => print_devices(&devices),
            Err(e) => error!("Listing bonded devices failed: {}", e),
        },
        ConsoleCommand::Connect(target) => {
            let target = target.as_deref().unwrap_or(prefix);
            if manager.is_connected() {
                manager.disconnect().await;
            }
            if let Err(e) = manager.find_and_connect(target).await {
                error!("{}", e);
            }
        }
        ConsoleCommand::Reconnect => {
            if let Err(e) = manager.reconnect().await {
                error!("Reconnect failed: {}", e);
            }
        }
        ConsoleCommand::Disconnect => manager.disconnect().await,
        ConsoleCommand::Clear => manager.clear_log(),
        ConsoleCommand::Status => {
            println!("{}", serde_json::to_string_pretty(&manager.snapshot())?);
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spp_link=info".parse()?),
        )
        .init();

    info!("Starting spp-link v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    let prefix = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.bluetooth.target_prefix.clone());
    info!("Configuration loaded, target prefix '{}'", prefix);

    let adapter = Arc::new(BluezAdapter::new(&config.bluetooth).await?);

    // Print the log as it grows
    let (message_tx, mut message_rx) = mpsc::channel::<Message>(64);
    tokio::spawn(async move {
        while let Some(message) = message_rx.recv().await {
            println!("{}", message.display_line());
        }
    });

    let manager = LinkManager::new(adapter, PermissionGate::unrestricted())
        .with_observer(message_tx)
        .with_discovery_timeout(config.bluetooth.discovery_timeout());

    if !manager.ensure_permissions().await {
        warn!("Permissions not granted, radio operations will fail");
    }

    if config.session.auto_connect {
        tokio::select! {
            result = manager.find_and_connect(&prefix) => {
                if let Err(e) = result {
                    error!("{}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                return Ok(());
            }
        }
    }

    info!("Ready. Type /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match ConsoleCommand::parse(line.trim_end()) {
                    Some(command) => {
                        if !run_command(&manager, &config, &prefix, command).await? {
                            break;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => warn!("Unknown command: {}", line.trim()),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    manager.disconnect().await;
    info!("spp-link stopped");
    Ok(())
}
