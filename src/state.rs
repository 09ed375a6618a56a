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

//! Link state shared between the core and its observers.

use parking_lot::RwLock;
use serde::Serialize;

use crate::bluetooth::DeviceDescriptor;

/// What the link is doing right now. Exactly one holds at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Pairing,
    Scanning,
    Connected(DeviceDescriptor),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Pairing => "Pairing...",
            ConnectionState::Scanning => "Scanning...",
            ConnectionState::Connected(_) => "Connected",
        }
    }

    /// In the middle of an operation rather than at rest.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Pairing | ConnectionState::Scanning
        )
    }
}

/// Shared link state.
#[derive(Debug)]
pub struct LinkState {
    /// Current connection status.
    status: RwLock<ConnectionState>,

    /// Device of the active session.
    current_device: RwLock<Option<DeviceDescriptor>>,

    /// Last device matched by the prefix policy.
    target_device: RwLock<Option<DeviceDescriptor>>,

    /// Last error, for display.
    last_error: RwLock<Option<String>>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self {
            status: RwLock::new(ConnectionState::Disconnected),
            current_device: RwLock::new(None),
            target_device: RwLock::new(None),
            last_error: RwLock::new(None),
        }
    }
}

impl LinkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ConnectionState {
        self.status.read().clone()
    }

    pub fn set_status(&self, status: ConnectionState) {
        *self.status.write() = status;
    }

    /// Enter a transient state until the returned guard drops.
    ///
    /// On drop the state goes back to the enclosing transient state if there
    /// was one, otherwise to whatever the session implies.
    pub fn enter(&self, status: ConnectionState) -> StatusGuard<'_> {
        let previous = std::mem::replace(&mut *self.status.write(), status);
        StatusGuard {
            state: self,
            previous,
        }
    }

    /// Derive the resting state from the current session.
    pub fn settle(&self) {
        let status = match self.current_device() {
            Some(device) => ConnectionState::Connected(device),
            None => ConnectionState::Disconnected,
        };
        self.set_status(status);
    }

    pub fn current_device(&self) -> Option<DeviceDescriptor> {
        self.current_device.read().clone()
    }

    pub fn set_current_device(&self, device: Option<DeviceDescriptor>) {
        *self.current_device.write() = device;
    }

    pub fn target_device(&self) -> Option<DeviceDescriptor> {
        self.target_device.read().clone()
    }

    pub fn set_target_device(&self, device: DeviceDescriptor) {
        *self.target_device.write() = Some(device);
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn set_error(&self, error: impl ToString) {
        *self.last_error.write() = Some(error.to_string());
    }

    pub fn clear_error(&self) {
        *self.last_error.write() = None;
    }
}

/// Restores the link status when an operation ends, however it ends.
pub struct StatusGuard<'a> {
    state: &'a LinkState,
    previous: ConnectionState,
}

impl Drop for StatusGuard<'_> {
    fn drop(&mut self) {
        if self.previous.is_transient() {
            self.state.set_status(self.previous.clone());
        } else {
            self.state.settle();
        }
    }
}
