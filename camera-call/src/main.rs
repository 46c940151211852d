//! Camera Call Harness
//!
//! Runs one camera call session on local UDP sockets:
//! - answers the invite from a JSON media description (`CALL_ANSWER_FILE`)
//! - keeps NAT mappings alive or answers ICE checks
//! - optionally bridges media into ffmpeg (`CALL_TRANSCODE_FILE`)
//! - hangs up on Ctrl+C or when the call ends
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


mod answer;

use anyhow::{anyhow, Result};
use call_session::{
    FfmpegLauncher, LocalRtpOptions, LocalStreamOptions, SessionCollaborators,
    SessionConfiguration, SessionOptions, SessionOrchestrator, SessionTransports,
    SignalingParameters,
};
use camera_call_config::{CallConfig, LogFormat};
use camera_call_logging::{init_console_logging, init_logging};
use media_transport::{TransportSplitter, UdpPortReserver, UdpSplitter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use uuid::Uuid;

const SERVICE_NAME: &str = "camera-call";
const SIGNALING_TLS_PORT: u16 = 5061;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = CallConfig::from_env()
        .map_err(|e| anyhow!("Failed to load configuration: {}", e))?;

    // Initialize logging
    let logging = match config.log_format {
        LogFormat::Json => init_logging(SERVICE_NAME, config.log_level()),
        LogFormat::Console => init_console_logging(SERVICE_NAME, config.log_level()),
    };
    logging.map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting Camera Call Harness");

    let answer_file = config
        .harness
        .answer_file
        .clone()
        .ok_or_else(|| anyhow!("CALL_ANSWER_FILE must point at a media description"))?;
    let remote = answer::load_answer(&answer_file)?;
    let transcode = config
        .harness
        .transcode_file
        .as_deref()
        .map(answer::load_transcode_spec)
        .transpose()?;

    info!(
        remote = %remote.address,
        audio_port = remote.audio.port,
        video_port = remote.video.port,
        transcode = transcode.is_some(),
        "Configuration loaded"
    );

    // Bind the four media sockets
    let bind_ip = config.session.media_bind_address;
    let audio_rtp = bind_splitter(bind_ip, "audio rtp").await?;
    let audio_rtcp = bind_splitter(bind_ip, "audio rtcp").await?;
    let video_rtp = bind_splitter(bind_ip, "video rtp").await?;
    let video_rtcp = bind_splitter(bind_ip, "video rtcp").await?;

    let local_ip = if bind_ip.is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        bind_ip
    };
    let signaling = SignalingParameters {
        session_id: Uuid::new_v4().to_string(),
        from: format!("sip:harness@{}", local_ip),
        to: format!("sip:camera@{}", remote.address),
        local_ip,
    };
    let configuration = SessionConfiguration {
        signaling: signaling.clone(),
        rtp: LocalRtpOptions {
            audio: local_stream(&audio_rtp, &audio_rtcp),
            video: local_stream(&video_rtp, &video_rtcp),
        },
        tls_port: SIGNALING_TLS_PORT,
        device: Arc::new(answer::LoopbackDevice::new("loopback camera", signaling)),
    };

    let transports = SessionTransports::new(audio_rtp, audio_rtcp, video_rtp, video_rtcp);
    let collaborators = SessionCollaborators {
        connector: Arc::new(answer::StaticAnswerConnector::new(remote)),
        ports: Arc::new(UdpPortReserver::new(IpAddr::V4(Ipv4Addr::LOCALHOST))),
        transcoder: Arc::new(FfmpegLauncher),
    };

    let session = SessionOrchestrator::new(
        configuration,
        transports,
        collaborators,
        SessionOptions::from(&config),
    )
    .map_err(|e| anyhow!("Failed to create call session: {}", e))?;

    let negotiated = session
        .start(transcode)
        .await
        .map_err(|e| anyhow!("Failed to start call: {}", e))?;

    info!(
        session_id = %session.session_id(),
        ice = negotiated.is_ice_capable(),
        "Call running. Press Ctrl+C to hang up."
    );

    // Wait for hangup or for the call to end on its own
    let ended = session.call_ended();
    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Shutdown signal received, hanging up"),
            Err(err) => error!(error = %err, "Unable to listen for shutdown signal"),
        },
        _ = ended.wait() => {
            info!("Call ended");
        }
    }

    session.stop().await;
    info!("Camera Call Harness stopped");

    Ok(())
}

async fn bind_splitter(ip: IpAddr, label: &str) -> Result<Arc<dyn TransportSplitter>> {
    let splitter = UdpSplitter::bind(SocketAddr::new(ip, 0), label)
        .await
        .map_err(|e| anyhow!("Failed to bind {} socket: {}", label, e))?;
    Ok(splitter)
}

fn local_stream(
    rtp: &Arc<dyn TransportSplitter>,
    rtcp: &Arc<dyn TransportSplitter>,
) -> LocalStreamOptions {
    LocalStreamOptions {
        rtp_port: rtp.local_port(),
        rtcp_port: rtcp.local_port(),
        ssrc: rand::random(),
        crypto: None,
    }
}
