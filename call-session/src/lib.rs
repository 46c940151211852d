//! Camera call sessions
//!
//! This crate drives a single call with a camera:
//! - signaling through a pluggable [`SignalingClient`]
//! - RTCP multiplexing detection and handle aliasing
//! - STUN keepalive or ICE responder, depending on the remote
//! - optional transcoder bridge fed with a session description and
//!   forwarded media
//! - one guarded teardown path for stop, remote hangup and transcoder exit
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


pub mod error;
pub mod media;
pub mod notify;
pub mod orchestrator;
pub mod retry;
pub mod sdp;
pub mod signaling;
pub mod transcode;
pub mod transports;

pub use error::{SessionError, SessionResult};
pub use media::{
    LocalRtpOptions, LocalStreamOptions, MediaDescription, ReservedPorts, SessionConfiguration,
    SignalingParameters, SrtpCrypto, StreamDescription,
};
pub use notify::{OnceListener, OnceSignal};
pub use orchestrator::{CallLifecycleState, SessionCollaborators, SessionOptions, SessionOrchestrator};
pub use retry::RefreshPolicy;
pub use sdp::transcoder_session_description;
pub use signaling::{Device, SignalingClient, SignalingConnector, SignalingError};
pub use transcode::{
    ExitCallback, FfmpegLauncher, TranscodeLaunch, TranscodeLauncher, TranscodeProcess,
    TranscodeSpec, VideoTranscode,
};
pub use transports::{RtcpTransport, SessionTransports, StreamRole};
