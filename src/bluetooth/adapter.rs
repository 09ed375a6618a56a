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

//! Radio adapter abstraction.
//!
//! The link core only talks to the radio through these traits, so the same
//! state machine runs against BlueZ in production and against in-memory
//! adapters in tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::device::DeviceDescriptor;
use crate::error::LinkResult;

/// Event delivered by a link's inbound listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Bytes read from the remote device.
    Data(Vec<u8>),
    /// Reading failed; the link is probably gone.
    Error(String),
    /// The remote side closed the stream.
    Closed,
}

/// Fan-out of inbound events that keeps everything sent before the first
/// subscriber.
///
/// The receiver created with the channel is parked and handed to the first
/// [`InboundChannel::subscribe`] call, so bytes a device sends right after
/// the link opens are still delivered. Later subscribers only see events
/// sent after they subscribed.
pub struct InboundChannel {
    sender: broadcast::Sender<InboundEvent>,
    parked: Mutex<Option<broadcast::Receiver<InboundEvent>>>,
}

impl InboundChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity);
        Self {
            sender,
            parked: Mutex::new(Some(receiver)),
        }
    }

    /// Deliver an event. Returns `false` when nobody can ever receive it.
    pub fn send(&self, event: InboundEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.parked
            .lock()
            .take()
            .unwrap_or_else(|| self.sender.subscribe())
    }

    /// Live receivers, including the parked one.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// The radio subsystem.
///
/// Every method may suspend for as long as the underlying operation takes;
/// the only bound is whatever the implementation itself enforces.
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Devices the OS already holds a bond with, in enumeration order.
    async fn list_bonded(&self) -> LinkResult<Vec<DeviceDescriptor>>;

    /// Whether the adapter is powered.
    async fn is_enabled(&self) -> LinkResult<bool>;

    /// Ask for the adapter to be enabled. `false` means declined.
    async fn request_enabled(&self) -> LinkResult<bool>;

    /// Scan for `timeout` and return what was seen during that window only.
    async fn discover(&self, timeout: Duration) -> LinkResult<Vec<DeviceDescriptor>>;

    /// Run the pairing handshake and return the bonded descriptor.
    async fn pair(&self, id: &str) -> LinkResult<DeviceDescriptor>;

    /// Open a byte-stream link to the device.
    async fn connect(&self, id: &str) -> LinkResult<Arc<dyn LinkHandle>>;

    /// A link to the device that is already open, if any.
    async fn connected(&self, id: &str) -> LinkResult<Option<Arc<dyn LinkHandle>>>;
}

/// An open byte-stream link to one device.
#[async_trait]
pub trait LinkHandle: Send + Sync {
    /// The device at the other end.
    fn device(&self) -> DeviceDescriptor;

    async fn is_connected(&self) -> bool;

    async fn write(&self, data: &[u8]) -> LinkResult<()>;

    async fn disconnect(&self) -> LinkResult<()>;

    /// Register for inbound events. Each call yields an independent receiver
    /// that sees every event delivered after the call.
    fn subscribe(&self) -> broadcast::Receiver<InboundEvent>;
}
