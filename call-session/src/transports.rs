//! The four transport handles owned by a session
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


use media_transport::{StreamKind, TransportSplitter};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One of the four transport handles of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    AudioRtp,
    AudioRtcp,
    VideoRtp,
    VideoRtcp,
}

impl StreamRole {
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamRole::AudioRtp | StreamRole::AudioRtcp => StreamKind::Audio,
            StreamRole::VideoRtp | StreamRole::VideoRtcp => StreamKind::Video,
        }
    }

    pub fn is_rtcp(&self) -> bool {
        matches!(self, StreamRole::AudioRtcp | StreamRole::VideoRtcp)
    }
}

/// RTCP handle of a stream: its own splitter, or the RTP splitter when
/// the remote multiplexes RTCP onto the RTP port
#[derive(Clone)]
pub enum RtcpTransport {
    Owned(Arc<dyn TransportSplitter>),
    Muxed,
}

#[derive(Clone)]
struct StreamTransports {
    rtp: Arc<dyn TransportSplitter>,
    rtcp: RtcpTransport,
}

impl StreamTransports {
    fn rtcp(&self) -> Arc<dyn TransportSplitter> {
        match &self.rtcp {
            RtcpTransport::Owned(rtcp) => rtcp.clone(),
            RtcpTransport::Muxed => self.rtp.clone(),
        }
    }

    fn close(&self) {
        self.rtp.close();
        if let RtcpTransport::Owned(rtcp) = &self.rtcp {
            rtcp.close();
        }
    }
}

/// Audio and video transport handles
#[derive(Clone)]
pub struct SessionTransports {
    audio: StreamTransports,
    video: StreamTransports,
    closed: bool,
}

impl SessionTransports {
    pub fn new(
        audio_rtp: Arc<dyn TransportSplitter>,
        audio_rtcp: Arc<dyn TransportSplitter>,
        video_rtp: Arc<dyn TransportSplitter>,
        video_rtcp: Arc<dyn TransportSplitter>,
    ) -> Self {
        SessionTransports {
            audio: StreamTransports {
                rtp: audio_rtp,
                rtcp: RtcpTransport::Owned(audio_rtcp),
            },
            video: StreamTransports {
                rtp: video_rtp,
                rtcp: RtcpTransport::Owned(video_rtcp),
            },
            closed: false,
        }
    }

    fn stream(&self, kind: StreamKind) -> &StreamTransports {
        match kind {
            StreamKind::Audio => &self.audio,
            StreamKind::Video => &self.video,
        }
    }

    fn stream_mut(&mut self, kind: StreamKind) -> &mut StreamTransports {
        match kind {
            StreamKind::Audio => &mut self.audio,
            StreamKind::Video => &mut self.video,
        }
    }

    pub fn rtp(&self, kind: StreamKind) -> Arc<dyn TransportSplitter> {
        self.stream(kind).rtp.clone()
    }

    /// RTCP handle, resolving a muxed RTCP to the RTP splitter
    pub fn rtcp(&self, kind: StreamKind) -> Arc<dyn TransportSplitter> {
        self.stream(kind).rtcp()
    }

    /// RTCP splitter only if the stream still owns one
    pub fn owned_rtcp(&self, kind: StreamKind) -> Option<Arc<dyn TransportSplitter>> {
        match &self.stream(kind).rtcp {
            RtcpTransport::Owned(rtcp) => Some(rtcp.clone()),
            RtcpTransport::Muxed => None,
        }
    }

    pub fn get(&self, role: StreamRole) -> Arc<dyn TransportSplitter> {
        if role.is_rtcp() {
            self.rtcp(role.kind())
        } else {
            self.rtp(role.kind())
        }
    }

    pub fn is_rtcp_muxed(&self, kind: StreamKind) -> bool {
        matches!(self.stream(kind).rtcp, RtcpTransport::Muxed)
    }

    /// Close the stream's own RTCP splitter and route RTCP through RTP.
    /// Returns false if it was already muxed or everything is closed.
    pub fn mux_rtcp(&mut self, kind: StreamKind) -> bool {
        if self.closed {
            return false;
        }
        let stream = self.stream_mut(kind);
        match std::mem::replace(&mut stream.rtcp, RtcpTransport::Muxed) {
            RtcpTransport::Owned(rtcp) => {
                rtcp.close();
                debug!(stream = %kind, port = rtcp.local_port(), "Closed RTCP splitter");
                true
            }
            RtcpTransport::Muxed => false,
        }
    }

    /// Close every handle once: video first, then audio
    pub fn close_all(&mut self) {
        if std::mem::replace(&mut self.closed, true) {
            return;
        }
        self.video.close();
        self.audio.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl fmt::Debug for SessionTransports {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let describe = |stream: &StreamTransports| match &stream.rtcp {
            RtcpTransport::Owned(rtcp) => format!("rtp {} rtcp {}", stream.rtp.label(), rtcp.label()),
            RtcpTransport::Muxed => format!("rtp {} rtcp muxed", stream.rtp.label()),
        };
        f.debug_struct("SessionTransports")
            .field("audio", &describe(&self.audio))
            .field("video", &describe(&self.video))
            .field("closed", &self.closed)
            .finish()
    }
}
