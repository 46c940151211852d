//! Negotiated media and session configuration types
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


use crate::signaling::Device;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use media_transport::{BindingTarget, StreamKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Default SDES crypto suite offered by cameras
pub const DEFAULT_CRYPTO_SUITE: &str = "AES_CM_128_HMAC_SHA1_80";

/// Parameters the signaling client needs to place a call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingParameters {
    /// Device-side session ticket
    pub session_id: String,
    /// Local SIP identity
    pub from: String,
    /// Remote SIP identity
    pub to: String,
    /// Local address advertised to the remote
    pub local_ip: IpAddr,
}

/// Local endpoint parameters for one stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalStreamOptions {
    pub rtp_port: u16,
    pub rtcp_port: u16,
    pub ssrc: u32,
    #[serde(default)]
    pub crypto: Option<SrtpCrypto>,
}

/// Local endpoint parameters for audio and video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRtpOptions {
    pub audio: LocalStreamOptions,
    pub video: LocalStreamOptions,
}

impl LocalRtpOptions {
    pub fn stream(&self, kind: StreamKind) -> &LocalStreamOptions {
        match kind {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
        }
    }
}

/// Input to a call session.
///
/// Only the signaling parameters are ever replaced, and only by an
/// expired-session refresh.
#[derive(Clone)]
pub struct SessionConfiguration {
    pub signaling: SignalingParameters,
    pub rtp: LocalRtpOptions,
    /// Port of the TLS signaling transport
    pub tls_port: u16,
    /// Camera that owns the session
    pub device: Arc<dyn Device>,
}

impl SessionConfiguration {
    /// Copy of this configuration with refreshed signaling parameters
    pub fn with_signaling(&self, signaling: SignalingParameters) -> Self {
        SessionConfiguration {
            signaling,
            ..self.clone()
        }
    }
}

impl fmt::Debug for SessionConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfiguration")
            .field("signaling", &self.signaling)
            .field("rtp", &self.rtp)
            .field("tls_port", &self.tls_port)
            .field("device", &self.device.name())
            .finish()
    }
}

/// SDES master key material for one stream
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrtpCrypto {
    #[serde(default = "default_suite")]
    pub suite: String,
    #[serde(with = "base64_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
}

fn default_suite() -> String {
    DEFAULT_CRYPTO_SUITE.to_string()
}

impl SrtpCrypto {
    pub fn new(key: Vec<u8>, salt: Vec<u8>) -> Self {
        SrtpCrypto {
            suite: default_suite(),
            key,
            salt,
        }
    }

    /// Base64 of key followed by salt, as carried in `inline:` key params
    pub fn inline_key(&self) -> String {
        let mut material = Vec::with_capacity(self.key.len() + self.salt.len());
        material.extend_from_slice(&self.key);
        material.extend_from_slice(&self.salt);
        STANDARD.encode(material)
    }
}

impl fmt::Debug for SrtpCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs
        f.debug_struct("SrtpCrypto")
            .field("suite", &self.suite)
            .field("key_len", &self.key.len())
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Remote parameters for one negotiated stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescription {
    pub port: u16,
    pub rtcp_port: u16,
    #[serde(default)]
    pub ssrc: Option<u32>,
    #[serde(default)]
    pub ice_ufrag: Option<String>,
    #[serde(default)]
    pub ice_pwd: Option<String>,
    #[serde(default)]
    pub crypto: Option<SrtpCrypto>,
}

impl StreamDescription {
    /// RTP and RTCP share one port
    pub fn is_rtcp_muxed(&self) -> bool {
        self.port == self.rtcp_port
    }
}

/// Remote media parameters returned by a successful invite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescription {
    pub address: IpAddr,
    pub audio: StreamDescription,
    pub video: StreamDescription,
}

impl MediaDescription {
    pub fn stream(&self, kind: StreamKind) -> &StreamDescription {
        match kind {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
        }
    }

    /// Remote offered ICE, so connectivity checks replace the keepalive
    pub fn is_ice_capable(&self) -> bool {
        self.video.ice_ufrag.is_some()
    }

    /// Where binding requests for `kind` are sent
    pub fn binding_target(&self, kind: StreamKind) -> BindingTarget {
        let stream = self.stream(kind);
        BindingTarget {
            address: self.address,
            rtp_port: stream.port,
            rtcp_port: stream.rtcp_port,
            ice_ufrag: stream.ice_ufrag.clone(),
            ice_pwd: stream.ice_pwd.clone(),
        }
    }
}

/// Local ports the transcoder listens on. Each RTP port is followed by
/// its RTCP companion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedPorts {
    pub audio: u16,
    pub video: u16,
}

impl ReservedPorts {
    pub fn rtp(&self, kind: StreamKind) -> u16 {
        match kind {
            StreamKind::Audio => self.audio,
            StreamKind::Video => self.video,
        }
    }

    pub fn rtcp(&self, kind: StreamKind) -> u16 {
        self.rtp(kind).wrapping_add(1)
    }
}
