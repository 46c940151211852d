//! Error types for media transport
// Copyright 2025 Francisco F. Pinochet
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


use thiserror::Error;

/// Media transport error
#[derive(Debug, Error)]
pub enum TransportError {
    /// Socket was already closed
    #[error("Transport closed: {0}")]
    Closed(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// STUN protocol error
    #[error("STUN error: {0}")]
    StunError(String),

    /// No suitable run of free ports was found
    #[error("Port reservation failed: {0}")]
    PortReservation(String),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::NetworkError(err.to_string())
    }
}
