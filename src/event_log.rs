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

//! In-memory log of the byte stream and link milestones.

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

/// Origin of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageKind {
    Sent,
    Received,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Sent => "SENT",
            MessageKind::Received => "RECV",
            MessageKind::System => "SYS",
        }
    }
}

/// A single log entry. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl Message {
    fn new(kind: MessageKind, content: String) -> Self {
        Self {
            kind,
            content,
            timestamp: Local::now(),
        }
    }

    /// Single line rendering for consoles.
    pub fn display_line(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S"),
            self.kind.as_str(),
            self.content.trim_end()
        )
    }
}

/// Append-only message log, emptied only by [`EventLog::clear`].
#[derive(Debug, Default)]
pub struct EventLog {
    entries: RwLock<Vec<Message>>,
    observer: Option<mpsc::Sender<Message>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that also offers every appended message to `observer`.
    ///
    /// A full or closed observer channel drops the notification; the
    /// append itself always succeeds.
    pub fn with_observer(observer: mpsc::Sender<Message>) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            observer: Some(observer),
        }
    }

    /// Append a message stamped with the current time.
    ///
    /// Stamping, notifying and storing happen under one write lock, so the
    /// stored order, the timestamp order and the observer's order agree.
    pub fn append(&self, kind: MessageKind, content: impl Into<String>) {
        let content = content.into();
        let mut entries = self.entries.write();

        let message = Message::new(kind, content);
        debug!("{}", message.display_line());

        if let Some(observer) = &self.observer {
            let _ = observer.try_send(message.clone());
        }
        entries.push(message);
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write();
        debug!("Event log cleared ({} entries)", entries.len());
        entries.clear();
    }

    /// Copy of the log in append order.
    pub fn messages(&self) -> Vec<Message> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
