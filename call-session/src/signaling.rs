//! Signaling collaborators consumed by the session
//!
//! The SIP dialog itself lives behind [`SignalingClient`]; the session only
//! needs invite, termination and a few mid-call requests.
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


use crate::error::SessionResult;
use crate::media::{MediaDescription, SessionConfiguration, SignalingParameters};
use crate::notify::OnceListener;
use async_trait::async_trait;
use media_transport::StreamKind;
use std::sync::Arc;
use thiserror::Error;

/// Failures reported by a signaling client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// The session ticket expired; fresh parameters are needed
    #[error("Signaling session expired")]
    ExpiredSession,

    #[error("Signaling failed: {0}")]
    Failed(String),
}

/// One signaling dialog with the camera
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Place the call and return the remote's media parameters
    async fn invite(&self) -> Result<MediaDescription, SignalingError>;

    /// Tell the remote the call is over
    async fn send_termination(&self) -> Result<(), SignalingError>;

    /// Release the dialog; no further requests are made afterwards
    fn destroy(&self);

    async fn request_key_frame(&self) -> Result<(), SignalingError>;

    async fn activate_speaker(&self) -> Result<(), SignalingError>;

    /// Local ICE user fragment for `stream`, once known
    fn local_ufrag(&self, stream: StreamKind) -> Option<String>;

    /// Fires once when the remote ends the dialog
    fn ended_by_remote(&self) -> OnceListener;
}

/// Builds signaling clients for a configuration
pub trait SignalingConnector: Send + Sync {
    fn connect(&self, configuration: &SessionConfiguration)
        -> SessionResult<Arc<dyn SignalingClient>>;
}

/// Camera that owns a call session
#[async_trait]
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    /// Fresh signaling parameters after `session_id` expired
    async fn refreshed_signaling_parameters(
        &self,
        session_id: &str,
    ) -> Result<SignalingParameters, SignalingError>;
}
