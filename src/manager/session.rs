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

//! The connection session: connect, disconnect, send and the inbound
//! listener.

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::LinkManager;
use crate::bluetooth::{DeviceDescriptor, InboundEvent, LinkHandle};
use crate::error::{LinkError, LinkResult};
use crate::event_log::{EventLog, MessageKind};
use crate::state::{ConnectionState, LinkState};

/// The live link plus its inbound listener.
pub(super) struct ActiveSession {
    handle: Arc<dyn LinkHandle>,
    device: DeviceDescriptor,
    subscription: Subscription,
}

/// Inbound listener for one session.
///
/// Cancelling consumes the subscription, so it can end only once. Dropping
/// it cancels as well.
pub struct Subscription {
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    fn spawn(handle: &dyn LinkHandle, log: Arc<EventLog>, state: Arc<LinkState>) -> Self {
        // The first subscriber also gets whatever the link read before now.
        let events = handle.subscribe();
        let device = handle.device();
        let task = tokio::spawn(Self::listen(events, device, log, state));
        Self { task: Some(task) }
    }

    async fn listen(
        mut events: broadcast::Receiver<InboundEvent>,
        device: DeviceDescriptor,
        log: Arc<EventLog>,
        state: Arc<LinkState>,
    ) {
        debug!("Inbound listener started for {}", device.name);

        loop {
            match events.recv().await {
                Ok(InboundEvent::Data(bytes)) => {
                    log.append(MessageKind::Received, String::from_utf8_lossy(&bytes));
                }
                Ok(InboundEvent::Error(reason)) => {
                    let err = LinkError::TransportReadFailed(reason);
                    error!("{}", err);
                    state.set_error(&err);
                    log.append(MessageKind::System, err.to_string());
                    Self::mark_lost(&state, &device);
                    break;
                }
                Ok(InboundEvent::Closed) => {
                    info!("{} closed the connection", device.name);
                    log.append(
                        MessageKind::System,
                        format!("Connection closed by {}", device.name),
                    );
                    Self::mark_lost(&state, &device);
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Inbound listener lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }

        debug!("Inbound listener stopped for {}", device.name);
    }

    /// The link under this listener is gone. The session stays installed
    /// until the caller disconnects, but nothing reports it as connected.
    fn mark_lost(state: &LinkState, device: &DeviceDescriptor) {
        if state.current_device().is_some_and(|d| d.id == device.id) {
            state.set_current_device(None);
            if !state.status().is_transient() {
                state.settle();
            }
        }
    }

    /// Stop delivering inbound events.
    pub fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl LinkManager {
    /// Connect to `device`, adopting an already-open link when there is one.
    ///
    /// A session that is already active is replaced, not disconnected.
    pub async fn connect(&self, device: &DeviceDescriptor) -> LinkResult<DeviceDescriptor> {
        self.require_permissions().await?;

        let _connecting = self.state.enter(ConnectionState::Connecting);
        info!("Connecting to {} ({})", device.name, device.id);

        match self.open_session(device).await {
            Ok(device) => Ok(device),
            Err(e) => {
                error!("Connection to {} failed: {}", device.name, e);
                Err(self.fail(e))
            }
        }
    }

    async fn open_session(&self, device: &DeviceDescriptor) -> LinkResult<DeviceDescriptor> {
        if let Some(handle) = self.adapter.connected(&device.id).await? {
            info!("{} is already connected", device.name);
            self.install(handle, device.clone()).await;
            self.log.append(
                MessageKind::System,
                format!("Already connected to {}", device.name),
            );
            return Ok(device.clone());
        }

        let handle = self.adapter.connect(&device.id).await?;
        self.install(handle, device.clone()).await;
        self.log.append(MessageKind::System, format!("Connected to {}", device.name));
        info!("Connected to {}", device.name);
        Ok(device.clone())
    }

    /// Make `handle` the active session and start its listener.
    async fn install(&self, handle: Arc<dyn LinkHandle>, device: DeviceDescriptor) {
        let mut session = self.session.lock().await;

        if let Some(previous) = session.take() {
            warn!(
                "Replacing session with {} without disconnecting it",
                previous.device.name
            );
            previous.subscription.cancel();
        }

        let subscription =
            Subscription::spawn(handle.as_ref(), self.log.clone(), self.state.clone());
        self.directory.write().upsert(device.clone());
        self.state.set_current_device(Some(device.clone()));
        *session = Some(ActiveSession {
            handle,
            device,
            subscription,
        });
    }

    /// Tear down the session and wipe the message log.
    ///
    /// Best effort: teardown failures are recorded, never returned.
    pub async fn disconnect(&self) {
        let Some(session) = self.session.lock().await.take() else {
            debug!("Disconnect requested without a session");
            return;
        };

        session.subscription.cancel();

        if let Err(e) = session.handle.disconnect().await {
            warn!("Disconnect from {} failed: {}", session.device.name, e);
            self.state.set_error(&e);
        }

        self.log.append(
            MessageKind::System,
            format!("Disconnected from {}", session.device.name),
        );
        self.state.set_current_device(None);
        if !self.state.status().is_transient() {
            self.state.settle();
        }
        self.log.clear();
        info!("Disconnected from {}", session.device.name);
    }

    /// Write `data` to the active session.
    pub async fn try_send(&self, data: &[u8]) -> LinkResult<()> {
        let handle = self
            .session
            .lock()
            .await
            .as_ref()
            .map(|s| s.handle.clone())
            .ok_or(LinkError::NoActiveConnection)?;

        handle.write(data).await?;
        self.log.append(MessageKind::Sent, String::from_utf8_lossy(data));
        Ok(())
    }

    /// Write `data` to the active session, reporting failure as `false`.
    pub async fn send(&self, data: &[u8]) -> bool {
        match self.try_send(data).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Send failed: {}", e);
                self.state.set_error(&e);
                false
            }
        }
    }

    /// Whether the active session's listener is still running.
    pub async fn is_listening(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| !s.subscription.is_finished())
            .unwrap_or(false)
    }
}
