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

//! Error types for link operations.

use thiserror::Error;

/// Errors raised by the link core and its adapters.
///
/// Adapters classify their own failures so the variant a caller sees is
/// the root cause, passed through the resolver untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// Required operating permissions were not granted.
    #[error("Bluetooth permissions not granted")]
    PermissionDenied,

    /// The adapter is powered off and enabling it was declined.
    #[error("Bluetooth adapter is disabled")]
    AdapterDisabled,

    /// Neither bonded nor discovered devices matched the prefix.
    #[error("No device found with name starting with '{prefix}'")]
    TargetNotFound { prefix: String },

    /// Pairing handshake was rejected or timed out.
    #[error("Pairing with {device} failed: {reason}")]
    PairRejected { device: String, reason: String },

    /// Socket establishment failed.
    #[error("Connection to {device} failed: {reason}")]
    ConnectFailed { device: String, reason: String },

    /// An operation needed a session but none is active.
    #[error("No active connection")]
    NoActiveConnection,

    /// Writing to the active link failed.
    #[error("Write failed: {0}")]
    TransportWriteFailed(String),

    /// Reading from the active link failed.
    #[error("Read failed: {0}")]
    TransportReadFailed(String),

    /// Any other adapter failure (enumeration, discovery, teardown).
    #[error("Bluetooth adapter error: {0}")]
    Adapter(String),
}

impl From<bluer::Error> for LinkError {
    fn from(e: bluer::Error) -> Self {
        LinkError::Adapter(e.to_string())
    }
}

/// Result alias for link operations.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_cause() {
        let err = LinkError::TargetNotFound {
            prefix: "MP4".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No device found with name starting with 'MP4'"
        );

        let err = LinkError::PairRejected {
            device: "MP4-X".to_string(),
            reason: "Authentication Rejected".to_string(),
        };
        assert!(err.to_string().contains("MP4-X"));
        assert!(err.to_string().contains("Authentication Rejected"));
    }
}
