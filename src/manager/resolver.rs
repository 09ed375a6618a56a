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

//! Target resolution: bonded devices first, then discovery and pairing.

use tracing::{error, info, warn};

use super::LinkManager;
use crate::bluetooth::{first_match, DeviceDescriptor};
use crate::error::{LinkError, LinkResult};
use crate::event_log::MessageKind;
use crate::state::ConnectionState;

impl LinkManager {
    /// Find the first device whose name starts with `prefix` and connect.
    ///
    /// Bonded devices are searched first. Only when none matches is the
    /// adapter enabled, a discovery run and the first discovered match
    /// paired. Errors reach the caller unchanged.
    pub async fn find_and_connect(&self, prefix: &str) -> LinkResult<DeviceDescriptor> {
        match self.resolve_and_connect(prefix).await {
            Ok(device) => Ok(device),
            Err(e) => {
                error!("Find and connect for '{}' failed: {}", prefix, e);
                Err(self.fail(e))
            }
        }
    }

    async fn resolve_and_connect(&self, prefix: &str) -> LinkResult<DeviceDescriptor> {
        self.require_permissions().await?;

        let _scanning = self.state.enter(ConnectionState::Scanning);
        self.state.clear_error();
        info!("Looking for a device named '{}*'", prefix);

        let bonded = self.adapter.list_bonded().await?;
        self.directory.write().merge(bonded.iter().cloned());

        let device = match first_match(&bonded, prefix).cloned() {
            Some(device) => {
                info!("Found bonded device {} ({})", device.name, device.id);
                self.state.set_target_device(device.clone());
                device
            }
            None => {
                info!("No bonded match, starting discovery");
                self.ensure_adapter_enabled().await?;

                let discovered = self.adapter.discover(self.discovery_timeout).await?;
                self.directory.write().merge(discovered.iter().cloned());

                let device = first_match(&discovered, prefix)
                    .cloned()
                    .ok_or_else(|| LinkError::TargetNotFound {
                        prefix: prefix.to_string(),
                    })?;

                info!("Discovered {} ({})", device.name, device.id);
                self.state.set_target_device(device.clone());
                self.log.append(MessageKind::System, format!("Pairing with {}...", device.name));
                self.pair(&device).await?
            }
        };

        self.connect(&device).await
    }

    async fn ensure_adapter_enabled(&self) -> LinkResult<()> {
        if self.adapter.is_enabled().await? {
            return Ok(());
        }

        info!("Adapter is disabled, requesting enable");
        if self.adapter.request_enabled().await? {
            Ok(())
        } else {
            Err(LinkError::AdapterDisabled)
        }
    }

    /// Pair with `device` and return its bonded descriptor.
    pub async fn pair(&self, device: &DeviceDescriptor) -> LinkResult<DeviceDescriptor> {
        self.require_permissions().await?;

        let _pairing = self.state.enter(ConnectionState::Pairing);
        info!("Pairing with {} ({})", device.name, device.id);

        match self.adapter.pair(&device.id).await {
            Ok(paired) => {
                let paired = paired.into_bonded();
                self.directory.write().upsert(paired.clone());
                self.log.append(MessageKind::System, format!("Paired with {}", paired.name));
                Ok(paired)
            }
            Err(e) => {
                warn!("Pairing with {} failed: {}", device.name, e);
                Err(self.fail(e))
            }
        }
    }

    /// Connect again to the last resolved target.
    ///
    /// An existing session is disconnected first, which clears the log.
    /// Without a resolved target nothing is touched.
    pub async fn reconnect(&self) -> LinkResult<DeviceDescriptor> {
        let Some(target) = self.state.target_device() else {
            return Err(self.fail(LinkError::TargetNotFound {
                prefix: String::new(),
            }));
        };

        if self.session.lock().await.is_some() {
            self.disconnect().await;
        }

        info!("Reconnecting to {}", target.name);
        self.connect(&target).await
    }

    /// Bonded devices, refreshing the directory.
    pub async fn list_bonded_devices(&self) -> LinkResult<Vec<DeviceDescriptor>> {
        self.require_permissions().await?;

        let bonded = self.adapter.list_bonded().await.map_err(|e| self.fail(e))?;
        self.directory.write().merge(bonded.iter().cloned());
        Ok(bonded)
    }

    /// Run one discovery window. The adapter must already be enabled.
    pub async fn discover_devices(&self) -> LinkResult<Vec<DeviceDescriptor>> {
        if !self.is_adapter_enabled().await {
            return Err(self.fail(LinkError::AdapterDisabled));
        }

        let _scanning = self.state.enter(ConnectionState::Scanning);
        let discovered = self
            .adapter
            .discover(self.discovery_timeout)
            .await
            .map_err(|e| self.fail(e))?;

        self.directory.write().merge(discovered.iter().cloned());
        info!("{} devices discovered", discovered.len());
        Ok(discovered)
    }

    pub async fn is_adapter_enabled(&self) -> bool {
        match self.adapter.is_enabled().await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("Adapter query failed: {}", e);
                self.state.set_error(&e);
                false
            }
        }
    }

    pub async fn request_adapter_enabled(&self) -> bool {
        match self.adapter.request_enabled().await {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("Adapter query failed: {}", e);
                self.state.set_error(&e);
                false
            }
        }
    }
}
