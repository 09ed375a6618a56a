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

//! BlueZ implementation of the radio adapter.

use anyhow::Result;
use async_trait::async_trait;
use bluer::{AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport};
use futures::{pin_mut, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::adapter::{LinkHandle, RadioAdapter};
use super::device::DeviceDescriptor;
use super::link::{BluezLink, LinkRegistry};
use crate::config::BluetoothConfig;
use crate::error::{LinkError, LinkResult};

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Radio adapter backed by the BlueZ daemon.
pub struct BluezAdapter {
    adapter: bluer::Adapter,
    rfcomm_channel: u8,
    allow_power_on: bool,
    filter_spp_uuid: bool,
    links: Arc<LinkRegistry<BluezLink>>,
}

impl BluezAdapter {
    /// Open a BlueZ session and select the configured or default adapter.
    pub async fn new(config: &BluetoothConfig) -> Result<Self> {
        info!("Initializing Bluetooth adapter...");

        let session = bluer::Session::new().await?;
        info!("BlueZ session created");

        let adapter = match &config.adapter {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };
        info!("Using Bluetooth adapter: {}", adapter.name());

        Ok(Self {
            adapter,
            rfcomm_channel: config.rfcomm_channel,
            allow_power_on: config.allow_power_on,
            filter_spp_uuid: config.filter_spp_uuid,
            links: Arc::new(LinkRegistry::new()),
        })
    }

    fn parse_address(id: &str) -> LinkResult<Address> {
        id.parse()
            .map_err(|_| LinkError::Adapter(format!("Invalid device address '{}'", id)))
    }

    /// Build a descriptor for a device BlueZ knows about.
    async fn describe(&self, address: Address) -> LinkResult<DeviceDescriptor> {
        let device = self.adapter.device(address)?;
        let name = device
            .alias()
            .await
            .unwrap_or_else(|_| address.to_string());
        let bonded = device.is_paired().await.unwrap_or(false);
        Ok(DeviceDescriptor::new(address.to_string(), name, bonded))
    }

    /// Describe a discovered device together with its current signal
    /// strength. `None` means BlueZ has not heard it recently.
    async fn describe_in_range(
        &self,
        address: Address,
    ) -> LinkResult<(DeviceDescriptor, Option<i16>)> {
        let rssi = self.adapter.device(address)?.rssi().await.unwrap_or(None);
        Ok((self.describe(address).await?, rssi))
    }

    fn discovery_filter(&self) -> DiscoveryFilter {
        let mut filter = DiscoveryFilter::default();
        filter.transport = DiscoveryTransport::BrEdr;
        if self.filter_spp_uuid {
            filter.uuids = HashSet::from([SPP_UUID]);
        }
        filter
    }
}

#[async_trait]
impl RadioAdapter for BluezAdapter {
    async fn list_bonded(&self) -> LinkResult<Vec<DeviceDescriptor>> {
        let mut devices = Vec::new();

        for addr in self.adapter.device_addresses().await? {
            let device = self.adapter.device(addr)?;
            if device.is_paired().await? {
                let name = device.alias().await.unwrap_or_else(|_| addr.to_string());
                devices.push(DeviceDescriptor::new(addr.to_string(), name, true));
            }
        }

        debug!("{} bonded devices", devices.len());
        Ok(devices)
    }

    async fn is_enabled(&self) -> LinkResult<bool> {
        Ok(self.adapter.is_powered().await?)
    }

    async fn request_enabled(&self) -> LinkResult<bool> {
        if !self.allow_power_on {
            warn!("Adapter is powered off and powering on is not allowed");
            return Ok(false);
        }

        info!("Powering on Bluetooth adapter...");
        self.adapter.set_powered(true).await?;
        Ok(self.adapter.is_powered().await?)
    }

    async fn discover(&self, timeout: Duration) -> LinkResult<Vec<DeviceDescriptor>> {
        self.adapter
            .set_discovery_filter(self.discovery_filter())
            .await?;

        info!("Discovering devices for {:?}...", timeout);
        let events = self.adapter.discover_devices().await?;
        pin_mut!(events);

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let mut seen: Vec<Address> = Vec::new();
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                event = events.next() => match event {
                    Some(AdapterEvent::DeviceAdded(addr)) => {
                        if !seen.contains(&addr) {
                            debug!("Discovery reported {}", addr);
                            seen.push(addr);
                        }
                    }
                    Some(_) => {}
                    None => break,
                }
            }
        }

        // BlueZ also reports cached devices; names are resolved once the
        // window has closed so late name responses are picked up. RSSI is
        // only valid while discovery runs, so the stream stays alive until
        // this function returns, which stops discovery.
        let mut candidates = Vec::with_capacity(seen.len());
        for addr in seen {
            match self.describe_in_range(addr).await {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => warn!("Skipping {}: {}", addr, e),
            }
        }

        let found = retain_in_range(candidates);
        info!("Discovery finished, {} devices in range", found.len());
        Ok(found)
    }

    async fn pair(&self, id: &str) -> LinkResult<DeviceDescriptor> {
        let address = Self::parse_address(id)?;
        let device = self.adapter.device(address)?;

        if !device.is_paired().await.unwrap_or(false) {
            info!("Pairing with {}...", address);
            device.pair().await.map_err(|e| LinkError::PairRejected {
                device: id.to_string(),
                reason: e.to_string(),
            })?;
        }

        // Trust lets the device reconnect without prompting.
        if let Err(e) = device.set_trusted(true).await {
            warn!("Could not mark {} as trusted: {}", address, e);
        }

        Ok(self.describe(address).await?.into_bonded())
    }

    async fn connect(&self, id: &str) -> LinkResult<Arc<dyn LinkHandle>> {
        let address = Self::parse_address(id)?;
        let device = self.describe(address).await?;

        self.links.retain(|link| link.is_open());

        let link = BluezLink::open(device, address, self.rfcomm_channel, &self.links)
            .await
            .map_err(|e| LinkError::ConnectFailed {
                device: id.to_string(),
                reason: e.to_string(),
            })?;

        let link: Arc<dyn LinkHandle> = link;
        Ok(link)
    }

    async fn connected(&self, id: &str) -> LinkResult<Option<Arc<dyn LinkHandle>>> {
        let Some(link) = self.links.get(id) else {
            return Ok(None);
        };

        if link.is_connected().await {
            let link: Arc<dyn LinkHandle> = link;
            return Ok(Some(link));
        }

        debug!("Forgetting closed link to {}", id);
        self.links.forget(id, &link);
        Ok(None)
    }
}

/// Keep the devices that were heard during the discovery window.
fn retain_in_range(candidates: Vec<(DeviceDescriptor, Option<i16>)>) -> Vec<DeviceDescriptor> {
    candidates
        .into_iter()
        .filter_map(|(device, rssi)| match rssi {
            Some(rssi) => {
                debug!("Discovered {} ({}) at {} dBm", device.name, device.id, rssi);
                Some(device)
            }
            None => {
                debug!("Ignoring cached device {} ({})", device.name, device.id);
                None
            }
        })
        .collect()
}
