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

//! Device descriptors and the in-memory device directory.

use serde::{Deserialize, Serialize};

/// A Bluetooth device known to the host.
///
/// `id` is the device address and is the only identity; two descriptors
/// with the same id describe the same device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub bonded: bool,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, bonded: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            bonded,
        }
    }

    /// Case-sensitive name prefix match.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.name.starts_with(prefix)
    }

    /// Same device, marked as bonded.
    pub fn into_bonded(self) -> Self {
        Self {
            bonded: true,
            ..self
        }
    }
}

/// First device in enumeration order whose name starts with `prefix`.
pub fn first_match<'a>(
    devices: &'a [DeviceDescriptor],
    prefix: &str,
) -> Option<&'a DeviceDescriptor> {
    devices.iter().find(|d| d.matches_prefix(prefix))
}

/// Known devices, unique by id, in first-seen order.
#[derive(Debug, Default, Clone)]
pub struct DeviceDirectory {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a device or replace the existing entry with the same id.
    ///
    /// A bonded entry is never downgraded by an unbonded sighting of the
    /// same device.
    pub fn upsert(&mut self, device: DeviceDescriptor) {
        match self.devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => {
                let bonded = existing.bonded || device.bonded;
                *existing = DeviceDescriptor { bonded, ..device };
            }
            None => self.devices.push(device),
        }
    }

    pub fn merge<I>(&mut self, devices: I)
    where
        I: IntoIterator<Item = DeviceDescriptor>,
    {
        for device in devices {
            self.upsert(device);
        }
    }

    pub fn get(&self, id: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.id == id)
    }

    pub fn all(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn bonded(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.iter().filter(|d| d.bonded)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
