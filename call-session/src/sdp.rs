//! Session description handed to the transcoder
//!
//! The transcoder reads SRTP from the local ports the session forwards to,
//! so the document describes those ports together with the remote's SDES
//! keys. Field order and payload types are fixed by what the transcoder
//! expects.
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


use crate::media::{MediaDescription, ReservedPorts, SrtpCrypto};
use media_transport::StreamKind;

/// Address the transcoder listens on
pub const TRANSCODER_HOST: &str = "127.0.0.1";

/// Payload type for PCMU audio
pub const AUDIO_PAYLOAD_TYPE: u8 = 0;
/// Payload type for telephone events
pub const DTMF_PAYLOAD_TYPE: u8 = 101;
/// Payload type for H264 video
pub const VIDEO_PAYLOAD_TYPE: u8 = 99;

/// Build the transcoder input document.
///
/// The video section is only present when `include_video` is set.
pub fn transcoder_session_description(
    remote: &MediaDescription,
    ports: &ReservedPorts,
    include_video: bool,
) -> String {
    let mut lines: Vec<Option<String>> = vec![
        Some("v=0".to_string()),
        Some(format!("o=105202070 3747 461 IN IP4 {}", TRANSCODER_HOST)),
        Some("s=Talk".to_string()),
        Some(format!("c=IN IP4 {}", TRANSCODER_HOST)),
        Some("b=AS:380".to_string()),
        Some("t=0 0".to_string()),
        Some(
            "a=rtcp-xr:rcvr-rtt=all:10000 stat-summary=loss,dup,jitt,TTL voip-metrics".to_string(),
        ),
        Some(format!(
            "m=audio {} RTP/SAVP {} {}",
            ports.audio, AUDIO_PAYLOAD_TYPE, DTMF_PAYLOAD_TYPE
        )),
        Some(format!("a=rtpmap:{} PCMU/8000", AUDIO_PAYLOAD_TYPE)),
        crypto_line(remote.audio.crypto.as_ref()),
        Some(format!("a=rtcp:{}", ports.rtcp(StreamKind::Audio))),
    ];

    if include_video {
        lines.extend([
            Some(format!(
                "m=video {} RTP/SAVP {}",
                ports.video, VIDEO_PAYLOAD_TYPE
            )),
            Some(format!("a=rtpmap:{} H264/90000", VIDEO_PAYLOAD_TYPE)),
            crypto_line(remote.video.crypto.as_ref()),
            Some(format!("a=rtcp:{}", ports.rtcp(StreamKind::Video))),
        ]);
    }

    lines
        .into_iter()
        .flatten()
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn crypto_line(crypto: Option<&SrtpCrypto>) -> Option<String> {
    crypto.map(|c| format!("a=crypto:1 {} inline:{}", c.suite, c.inline_key()))
}
