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

//! Bluetooth Classic link core.
//!
//! Finds a peripheral by name prefix, pairs when needed, keeps one RFCOMM
//! session open and logs the byte stream in both directions.

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod event_log;
pub mod manager;
pub mod permissions;
pub mod state;

pub use bluetooth::{DeviceDescriptor, InboundChannel, InboundEvent, LinkHandle, RadioAdapter};
pub use error::{LinkError, LinkResult};
pub use event_log::{EventLog, Message, MessageKind};
pub use manager::{LinkManager, LinkSnapshot};
pub use permissions::{Capability, PermissionGate, PermissionPlatform, PermissionPrompter};
pub use state::ConnectionState;
