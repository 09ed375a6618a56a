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

//! The link manager: one core driving permissions, discovery, pairing and
//! the connection session.
//!
//! Operations that touch the connection (`connect`, `pair`,
//! `find_and_connect`, `reconnect`) must not overlap; the caller serializes
//! them. Inbound data is appended concurrently by the session listener.

mod resolver;
mod session;

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::bluetooth::{DeviceDescriptor, DeviceDirectory, RadioAdapter};
use crate::error::{LinkError, LinkResult};
use crate::event_log::{EventLog, Message};
use crate::permissions::PermissionGate;
use crate::state::{ConnectionState, LinkState};

pub use session::Subscription;
use session::ActiveSession;

/// Default discovery window.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(12);

/// Everything an observer needs to render the link.
#[derive(Debug, Clone, Serialize)]
pub struct LinkSnapshot {
    pub status: ConnectionState,
    pub is_scanning: bool,
    pub is_connecting: bool,
    pub is_pairing: bool,
    pub is_connected: bool,
    pub last_error: Option<String>,
    pub current_device: Option<DeviceDescriptor>,
    pub target_device: Option<DeviceDescriptor>,
    pub messages: Vec<Message>,
    pub permission_granted: bool,
}

/// Connection lifecycle for a single peripheral.
pub struct LinkManager {
    adapter: Arc<dyn RadioAdapter>,
    permissions: PermissionGate,
    directory: RwLock<DeviceDirectory>,
    state: Arc<LinkState>,
    log: Arc<EventLog>,
    session: Mutex<Option<ActiveSession>>,
    discovery_timeout: Duration,
}

impl LinkManager {
    /// Create a manager over `adapter`, gated by `permissions`.
    pub fn new(adapter: Arc<dyn RadioAdapter>, permissions: PermissionGate) -> Self {
        Self {
            adapter,
            permissions,
            directory: RwLock::new(DeviceDirectory::new()),
            state: Arc::new(LinkState::new()),
            log: Arc::new(EventLog::new()),
            session: Mutex::new(None),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    /// Offer every log message to `observer` as it is appended.
    pub fn with_observer(mut self, observer: mpsc::Sender<Message>) -> Self {
        self.log = Arc::new(EventLog::with_observer(observer));
        self
    }

    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Request the operating permissions. Never fails; `false` means denied.
    pub async fn ensure_permissions(&self) -> bool {
        let granted = self.permissions.ensure().await;
        if !granted {
            self.record_denial();
        }
        granted
    }

    /// Gate for radio operations. Makes no adapter call when denied.
    async fn require_permissions(&self) -> LinkResult<()> {
        if self.permissions.is_granted() || self.permissions.ensure().await {
            return Ok(());
        }
        self.record_denial();
        Err(LinkError::PermissionDenied)
    }

    fn record_denial(&self) {
        let reason = self
            .permissions
            .denial_reason()
            .unwrap_or_else(|| LinkError::PermissionDenied.to_string());
        warn!("{}", reason);
        self.state.set_error(reason);
    }

    /// Record a failure for observers and hand it back.
    fn fail(&self, error: LinkError) -> LinkError {
        self.state.set_error(&error);
        error
    }

    pub fn clear_log(&self) {
        self.log.clear();
    }

    pub fn messages(&self) -> Vec<Message> {
        self.log.messages()
    }

    pub fn status(&self) -> ConnectionState {
        self.state.status()
    }

    pub fn is_connected(&self) -> bool {
        self.state.current_device().is_some()
    }

    pub fn current_device(&self) -> Option<DeviceDescriptor> {
        self.state.current_device()
    }

    pub fn target_device(&self) -> Option<DeviceDescriptor> {
        self.state.target_device()
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.last_error()
    }

    /// Every device seen through bonded listing, discovery or pairing.
    pub fn devices(&self) -> Vec<DeviceDescriptor> {
        self.directory.read().all().to_vec()
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        let status = self.state.status();
        LinkSnapshot {
            is_scanning: status == ConnectionState::Scanning,
            is_connecting: status == ConnectionState::Connecting,
            is_pairing: status == ConnectionState::Pairing,
            is_connected: matches!(status, ConnectionState::Connected(_)),
            status,
            last_error: self.state.last_error(),
            current_device: self.state.current_device(),
            target_device: self.state.target_device(),
            messages: self.log.messages(),
            permission_granted: self.permissions.is_granted(),
        }
    }
}
