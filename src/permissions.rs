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

//! Permission gate for radio operations.
//!
//! Desktop BlueZ has no runtime permission model, so the gate grants
//! immediately there. Hosts with one plug in a [`PermissionPrompter`].

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

/// API level from which scan and connect are separate runtime permissions.
pub const SPLIT_PERMISSIONS_API_LEVEL: u32 = 31;

/// A runtime capability the host can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Capability {
    BluetoothScan,
    BluetoothConnect,
    AccessCoarseLocation,
}

/// The permission model of the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionPlatform {
    /// No runtime permissions; everything is granted.
    Unrestricted,
    /// Runtime permissions whose set depends on the platform version.
    Versioned { api_level: u32 },
}

impl PermissionPlatform {
    /// Capabilities that must all be granted before touching the radio.
    pub fn required_capabilities(&self) -> &'static [Capability] {
        match self {
            PermissionPlatform::Unrestricted => &[],
            PermissionPlatform::Versioned { api_level }
                if *api_level < SPLIT_PERMISSIONS_API_LEVEL =>
            {
                &[Capability::AccessCoarseLocation]
            }
            PermissionPlatform::Versioned { .. } => &[
                Capability::BluetoothScan,
                Capability::BluetoothConnect,
                Capability::AccessCoarseLocation,
            ],
        }
    }
}

/// The host's permission dialog.
#[async_trait]
pub trait PermissionPrompter: Send + Sync {
    /// Request `capabilities` in one prompt and return those granted.
    async fn request(&self, capabilities: &[Capability]) -> anyhow::Result<Vec<Capability>>;
}

/// Prompter for platforms that never ask.
pub struct GrantAll;

#[async_trait]
impl PermissionPrompter for GrantAll {
    async fn request(&self, capabilities: &[Capability]) -> anyhow::Result<Vec<Capability>> {
        Ok(capabilities.to_vec())
    }
}

/// Checks and requests the permissions radio operations need.
pub struct PermissionGate {
    platform: PermissionPlatform,
    prompter: Box<dyn PermissionPrompter>,
    granted: RwLock<bool>,
    denial: RwLock<Option<String>>,
}

impl PermissionGate {
    pub fn new(platform: PermissionPlatform, prompter: Box<dyn PermissionPrompter>) -> Self {
        Self {
            platform,
            prompter,
            granted: RwLock::new(false),
            denial: RwLock::new(None),
        }
    }

    /// Gate for a platform without runtime permissions.
    pub fn unrestricted() -> Self {
        Self::new(PermissionPlatform::Unrestricted, Box::new(GrantAll))
    }

    pub fn is_granted(&self) -> bool {
        *self.granted.read()
    }

    /// Why the last request failed, if it did.
    pub fn denial_reason(&self) -> Option<String> {
        self.denial.read().clone()
    }

    /// Request every required capability. Partial grants count as denial.
    pub async fn ensure(&self) -> bool {
        let required = self.platform.required_capabilities();
        if required.is_empty() {
            self.record(true, None);
            return true;
        }

        info!("Requesting permissions: {:?}", required);
        match self.prompter.request(required).await {
            Ok(granted) => {
                let missing: Vec<Capability> = required
                    .iter()
                    .copied()
                    .filter(|c| !granted.contains(c))
                    .collect();

                if missing.is_empty() {
                    info!("All permissions granted");
                    self.record(true, None);
                    true
                } else {
                    let reason = format!("Permissions not granted: {:?}", missing);
                    warn!("{}", reason);
                    self.record(false, Some(reason));
                    false
                }
            }
            Err(e) => {
                let reason = format!("Permission request failed: {}", e);
                warn!("{}", reason);
                self.record(false, Some(reason));
                false
            }
        }
    }

    fn record(&self, granted: bool, denial: Option<String>) {
        *self.granted.write() = granted;
        *self.denial.write() = denial;
    }
}
