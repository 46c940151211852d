//! Error types for call sessions
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


use crate::signaling::SignalingError;
use media_transport::TransportError;
use thiserror::Error;

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur while running a call session
#[derive(Error, Debug)]
pub enum SessionError {
    /// `start` was called on a session that is starting or active
    #[error("Session already started")]
    AlreadyStarted,

    /// The session has ended; it cannot be started or used again
    #[error("Session already ended")]
    AlreadyEnded,

    /// The signaling channel reported an error
    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    /// The signaling session kept expiring after every refresh
    #[error("Signaling session still expired after {attempts} refreshes")]
    RefreshLimitExceeded { attempts: u32 },

    /// Transport or port reservation error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The transcoder process could not be launched or fed
    #[error("Transcoder error: {0}")]
    Transcode(String),
}
