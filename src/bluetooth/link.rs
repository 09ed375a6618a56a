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

//! RFCOMM link to a single device.

use async_trait::async_trait;
use bluer::rfcomm::stream::{OwnedReadHalf, OwnedWriteHalf};
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::Address;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::adapter::{InboundChannel, InboundEvent, LinkHandle};
use super::device::DeviceDescriptor;
use crate::error::{LinkError, LinkResult};

/// Size of a single socket read.
const READ_BUFFER_SIZE: usize = 1024;

/// Inbound events buffered per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Open links by device id.
pub struct LinkRegistry<T> {
    links: parking_lot::Mutex<HashMap<String, Arc<T>>>,
}

impl<T> Default for LinkRegistry<T> {
    fn default() -> Self {
        Self {
            links: parking_lot::Mutex::new(HashMap::new()),
        }
    }
}

impl<T> LinkRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str, link: Arc<T>) {
        self.links.lock().insert(id.to_string(), link);
    }

    pub fn get(&self, id: &str) -> Option<Arc<T>> {
        self.links.lock().get(id).cloned()
    }

    /// Remove `link` if it is still the entry for `id`.
    pub fn forget(&self, id: &str, link: &T) {
        let mut links = self.links.lock();
        if links
            .get(id)
            .is_some_and(|entry| std::ptr::eq(Arc::as_ptr(entry), link))
        {
            links.remove(id);
        }
    }

    /// Keep only the links for which `keep` holds.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) {
        self.links.lock().retain(|_, link| keep(&**link));
    }

    pub fn len(&self) -> usize {
        self.links.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.lock().is_empty()
    }
}

/// An open RFCOMM stream.
///
/// A reader task owns the read half and fans every chunk out to all
/// subscribers; writes go through the write half under a lock.
pub struct BluezLink {
    device: DeviceDescriptor,
    writer: Mutex<Option<OwnedWriteHalf>>,
    events: Arc<InboundChannel>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
    open: Arc<AtomicBool>,
    registry: Weak<LinkRegistry<BluezLink>>,
}

impl BluezLink {
    /// Connect to `address` on `channel`, start the reader task and record
    /// the link in `registry` until it is disconnected.
    pub async fn open(
        device: DeviceDescriptor,
        address: Address,
        channel: u8,
        registry: &Arc<LinkRegistry<BluezLink>>,
    ) -> std::io::Result<Arc<Self>> {
        info!("Opening RFCOMM link to {} on channel {}", address, channel);
        let stream = Stream::connect(SocketAddr::new(address, channel)).await?;
        let (reader, writer) = stream.into_split();

        let events = Arc::new(InboundChannel::new(EVENT_CAPACITY));
        let open = Arc::new(AtomicBool::new(true));

        let reader_task = tokio::spawn(Self::read_loop(reader, events.clone(), open.clone()));

        let link = Arc::new(Self {
            device,
            writer: Mutex::new(Some(writer)),
            events,
            reader: parking_lot::Mutex::new(Some(reader_task)),
            open,
            registry: Arc::downgrade(registry),
        });
        registry.insert(&link.device.id, link.clone());
        Ok(link)
    }

    /// Whether the reader has not yet seen the stream close.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn read_loop(
        mut reader: OwnedReadHalf,
        events: Arc<InboundChannel>,
        open: Arc<AtomicBool>,
    ) {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    info!("Connection closed by remote");
                    open.store(false, Ordering::SeqCst);
                    events.send(InboundEvent::Closed);
                    break;
                }
                Ok(n) => {
                    debug!("Received {} bytes", n);
                    if !events.send(InboundEvent::Data(buf[..n].to_vec())) {
                        warn!("Dropped {} bytes, no listener", n);
                    }
                }
                Err(e) => {
                    error!("Read error: {}", e);
                    open.store(false, Ordering::SeqCst);
                    events.send(InboundEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl LinkHandle for BluezLink {
    fn device(&self) -> DeviceDescriptor {
        self.device.clone()
    }

    async fn is_connected(&self) -> bool {
        self.is_open()
    }

    async fn write(&self, data: &[u8]) -> LinkResult<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(LinkError::NoActiveConnection)?;

        writer
            .write_all(data)
            .await
            .map_err(|e| LinkError::TransportWriteFailed(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| LinkError::TransportWriteFailed(e.to_string()))?;

        debug!("Sent {} bytes to {}", data.len(), self.device.name);
        Ok(())
    }

    async fn disconnect(&self) -> LinkResult<()> {
        self.open.store(false, Ordering::SeqCst);

        if let Some(task) = self.reader.lock().take() {
            task.abort();
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.forget(&self.device.id, self);
        }

        let writer = self.writer.lock().await.take();
        match writer {
            Some(mut writer) => {
                writer
                    .shutdown()
                    .await
                    .map_err(|e| LinkError::Adapter(e.to_string()))?;
                info!("RFCOMM link to {} closed", self.device.id);
            }
            None => warn!("RFCOMM link to {} already closed", self.device.id),
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe()
    }
}

impl Drop for BluezLink {
    fn drop(&mut self) {
        if let Some(task) = self.reader.get_mut().take() {
            task.abort();
        }
    }
}
