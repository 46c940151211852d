//! Static-answer signaling for the loopback harness
//!
//! Instead of a SIP dialog, the invite is answered from a media
//! description loaded from disk.
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


use anyhow::{Context, Result};
use async_trait::async_trait;
use call_session::{
    Device, MediaDescription, OnceListener, OnceSignal, SessionConfiguration, SessionResult,
    SignalingClient, SignalingConnector, SignalingError, SignalingParameters, TranscodeSpec,
};
use media_transport::StreamKind;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Read the remote media description from a JSON file
pub fn load_answer(path: &Path) -> Result<MediaDescription> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read answer file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid media description in {}", path.display()))
}

/// Read transcoder arguments from a JSON file
pub fn load_transcode_spec(path: &Path) -> Result<TranscodeSpec> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transcode file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Invalid transcode spec in {}", path.display()))
}

/// Builds clients that answer every invite with the same description
pub struct StaticAnswerConnector {
    answer: MediaDescription,
}

impl StaticAnswerConnector {
    pub fn new(answer: MediaDescription) -> Self {
        Self { answer }
    }
}

impl SignalingConnector for StaticAnswerConnector {
    fn connect(
        &self,
        configuration: &SessionConfiguration,
    ) -> SessionResult<Arc<dyn SignalingClient>> {
        debug!(
            session_id = %configuration.signaling.session_id,
            to = %configuration.signaling.to,
            "Connecting static answer signaling"
        );
        Ok(Arc::new(StaticAnswerClient {
            answer: self.answer.clone(),
            ended: OnceSignal::new(),
            destroyed: AtomicBool::new(false),
        }))
    }
}

struct StaticAnswerClient {
    answer: MediaDescription,
    ended: OnceSignal,
    destroyed: AtomicBool,
}

impl StaticAnswerClient {
    fn ensure_open(&self) -> Result<(), SignalingError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(SignalingError::Failed("signaling client destroyed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingClient for StaticAnswerClient {
    async fn invite(&self) -> Result<MediaDescription, SignalingError> {
        self.ensure_open()?;
        Ok(self.answer.clone())
    }

    async fn send_termination(&self) -> Result<(), SignalingError> {
        self.ensure_open()?;
        info!("Sending BYE");
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    async fn request_key_frame(&self) -> Result<(), SignalingError> {
        self.ensure_open()?;
        debug!("Key frame requested");
        Ok(())
    }

    async fn activate_speaker(&self) -> Result<(), SignalingError> {
        self.ensure_open()?;
        debug!("Camera speaker activated");
        Ok(())
    }

    fn local_ufrag(&self, _stream: StreamKind) -> Option<String> {
        None
    }

    fn ended_by_remote(&self) -> OnceListener {
        self.ended.listener()
    }
}

/// Camera stand-in that issues fresh session tickets on refresh
pub struct LoopbackDevice {
    name: String,
    parameters: SignalingParameters,
}

impl LoopbackDevice {
    pub fn new(name: impl Into<String>, parameters: SignalingParameters) -> Self {
        Self {
            name: name.into(),
            parameters,
        }
    }
}

#[async_trait]
impl Device for LoopbackDevice {
    fn name(&self) -> &str {
        &self.name
    }

    async fn refreshed_signaling_parameters(
        &self,
        session_id: &str,
    ) -> Result<SignalingParameters, SignalingError> {
        let refreshed = Uuid::new_v4().to_string();
        info!(expired = %session_id, session_id = %refreshed, "Issued new session ticket");
        Ok(SignalingParameters {
            session_id: refreshed,
            ..self.parameters.clone()
        })
    }
}
