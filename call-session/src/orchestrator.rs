//! Call session orchestration
//!
//! A [`SessionOrchestrator`] owns one call with a camera: it reserves local
//! ports for the transcoder, places the call through the signaling client,
//! keeps NAT mappings alive (or answers ICE checks), wires inbound media to
//! an optional transcoder, and tears everything down exactly once.
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


use crate::error::{SessionError, SessionResult};
use crate::media::{MediaDescription, ReservedPorts, SessionConfiguration};
use crate::notify::{OnceListener, OnceSignal};
use crate::retry::RefreshPolicy;
use crate::sdp::transcoder_session_description;
use crate::signaling::{SignalingClient, SignalingConnector, SignalingError};
use crate::transcode::{TranscodeLaunch, TranscodeLauncher, TranscodeSpec};
use crate::transports::{SessionTransports, StreamRole};
use camera_call_config::CallConfig;
use media_transport::{
    install_stun_responder, send_stun_binding_request, ForwardTarget, InboundPacket,
    PacketHandler, PortReserver, StreamKind, StunBindingRequest, Subscription, SubscriptionSet,
    TransportError, TransportSplitter,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const STREAMS: [StreamKind; 2] = [StreamKind::Audio, StreamKind::Video];

/// Lifecycle of a session. `Ended` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallLifecycleState {
    NotStarted,
    Starting,
    Active,
    Ended,
}

/// Tunables for a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Period of STUN keepalives when the remote does not do ICE
    pub keepalive_interval: Duration,
    pub refresh_policy: RefreshPolicy,
    /// Transcoder executable
    pub transcoder_binary: PathBuf,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_millis(500),
            refresh_policy: RefreshPolicy::default(),
            transcoder_binary: PathBuf::from("ffmpeg"),
        }
    }
}

impl From<&CallConfig> for SessionOptions {
    fn from(config: &CallConfig) -> Self {
        Self {
            keepalive_interval: Duration::from_millis(config.session.keepalive_interval_ms),
            refresh_policy: RefreshPolicy::new(config.session.max_session_refreshes),
            transcoder_binary: config.transcoder.ffmpeg_path.clone(),
        }
    }
}

/// Services a session depends on
#[derive(Clone)]
pub struct SessionCollaborators {
    pub connector: Arc<dyn SignalingConnector>,
    pub ports: Arc<dyn PortReserver>,
    pub transcoder: Arc<dyn TranscodeLauncher>,
}

struct ActiveSignaling {
    client: Arc<dyn SignalingClient>,
    // Aborts the remote-termination watcher when the client is replaced
    _ended_watch: Subscription,
}

struct SessionInner {
    session_id: Uuid,
    state: Mutex<CallLifecycleState>,
    configuration: Mutex<SessionConfiguration>,
    signaling: Mutex<Option<ActiveSignaling>>,
    transports: Mutex<SessionTransports>,
    reserved_ports: Mutex<Option<ReservedPorts>>,
    subscriptions: SubscriptionSet,
    call_ended: OnceSignal,
    collaborators: SessionCollaborators,
    options: SessionOptions,
}

/// One call with a camera
pub struct SessionOrchestrator {
    inner: Arc<SessionInner>,
}

impl SessionOrchestrator {
    /// Create a session and its first signaling client.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        configuration: SessionConfiguration,
        transports: SessionTransports,
        collaborators: SessionCollaborators,
        options: SessionOptions,
    ) -> SessionResult<Self> {
        let inner = Arc::new(SessionInner {
            session_id: Uuid::new_v4(),
            state: Mutex::new(CallLifecycleState::NotStarted),
            configuration: Mutex::new(configuration.clone()),
            signaling: Mutex::new(None),
            transports: Mutex::new(transports),
            reserved_ports: Mutex::new(None),
            subscriptions: SubscriptionSet::new(),
            call_ended: OnceSignal::new(),
            collaborators,
            options,
        });
        inner.replace_signaling_client(configuration)?;

        info!(
            session_id = %inner.session_id,
            device = %inner.device_name(),
            "Created call session"
        );
        Ok(Self { inner })
    }

    /// Place the call and wire up media.
    ///
    /// Any failure other than misuse ends the session before the error is
    /// returned.
    pub async fn start(&self, transcode: Option<TranscodeSpec>) -> SessionResult<MediaDescription> {
        self.inner.begin_start()?;
        info!(
            session_id = %self.inner.session_id,
            device = %self.inner.device_name(),
            transcode = transcode.is_some(),
            "Starting call session"
        );

        match self.inner.negotiate(transcode).await {
            Ok(description) => {
                info!(session_id = %self.inner.session_id, remote = %description.address, "Call session active");
                Ok(description)
            }
            Err(e) => {
                if !matches!(e, SessionError::AlreadyEnded) {
                    error!(session_id = %self.inner.session_id, error = %e, "Call session failed to start");
                }
                self.inner.end_call(true).await;
                Err(e)
            }
        }
    }

    /// End the call, sending a termination to the remote. Idempotent.
    pub async fn stop(&self) {
        self.inner.end_call(true).await;
    }

    pub async fn request_key_frame(&self) -> SessionResult<()> {
        let client = self.inner.signaling_client()?;
        client.request_key_frame().await?;
        Ok(())
    }

    pub async fn activate_camera_speaker(&self) -> SessionResult<()> {
        let client = self.inner.signaling_client()?;
        client.activate_speaker().await?;
        Ok(())
    }

    /// Replace the signaling client with one built for `configuration`.
    /// The previous client is destroyed first.
    pub fn create_signaling_client(&self, configuration: SessionConfiguration) -> SessionResult<()> {
        self.inner.replace_signaling_client(configuration)
    }

    pub fn session_id(&self) -> Uuid {
        self.inner.session_id
    }

    pub fn state(&self) -> CallLifecycleState {
        self.inner.state()
    }

    /// Transcoder ports, once `start` has reserved them
    pub fn reserved_ports(&self) -> Option<ReservedPorts> {
        *self.inner.reserved_ports.lock()
    }

    /// Current handle for `role`; a muxed RTCP role yields the RTP splitter
    pub fn transport(&self, role: StreamRole) -> Arc<dyn TransportSplitter> {
        self.inner.transports.lock().get(role)
    }

    pub fn configuration(&self) -> SessionConfiguration {
        self.inner.configuration.lock().clone()
    }

    /// Fires once when the call has ended, for any reason
    pub fn call_ended(&self) -> OnceListener {
        self.inner.call_ended.listener()
    }
}

impl SessionInner {
    fn state(&self) -> CallLifecycleState {
        *self.state.lock()
    }

    fn device_name(&self) -> String {
        self.configuration.lock().device.name().to_string()
    }

    fn begin_start(&self) -> SessionResult<()> {
        let mut state = self.state.lock();
        match *state {
            CallLifecycleState::Ended => Err(SessionError::AlreadyEnded),
            CallLifecycleState::Starting | CallLifecycleState::Active => {
                Err(SessionError::AlreadyStarted)
            }
            CallLifecycleState::NotStarted => {
                *state = CallLifecycleState::Starting;
                Ok(())
            }
        }
    }

    fn activate(&self) -> SessionResult<()> {
        let mut state = self.state.lock();
        if *state == CallLifecycleState::Ended {
            return Err(SessionError::AlreadyEnded);
        }
        *state = CallLifecycleState::Active;
        Ok(())
    }

    fn signaling_client(&self) -> SessionResult<Arc<dyn SignalingClient>> {
        self.signaling
            .lock()
            .as_ref()
            .map(|active| active.client.clone())
            .ok_or(SessionError::AlreadyEnded)
    }

    fn replace_signaling_client(
        self: &Arc<Self>,
        configuration: SessionConfiguration,
    ) -> SessionResult<()> {
        if self.state() == CallLifecycleState::Ended {
            return Err(SessionError::AlreadyEnded);
        }

        let previous = self.signaling.lock().take();
        if let Some(previous) = previous {
            previous.client.destroy();
            debug!(session_id = %self.session_id, "Destroyed previous signaling client");
        }

        let client = self.collaborators.connector.connect(&configuration)?;
        let ended_by_remote = client.ended_by_remote();
        let weak = Arc::downgrade(self);
        let watch = tokio::spawn(async move {
            if !ended_by_remote.wait().await {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                info!(session_id = %inner.session_id, "Call ended by remote");
                // Teardown aborts this watcher, so it runs on its own task
                tokio::spawn(async move { inner.end_call(false).await });
            }
        });

        let active = ActiveSignaling {
            client,
            _ended_watch: Subscription::from_task(watch),
        };

        // Teardown marks the state before taking the client, so checking
        // under the signaling lock never installs a client it would miss
        let mut signaling = self.signaling.lock();
        if self.state() == CallLifecycleState::Ended {
            drop(signaling);
            active.client.destroy();
            debug!(session_id = %self.session_id, "Session ended while connecting, dropped new signaling client");
            return Err(SessionError::AlreadyEnded);
        }
        *self.configuration.lock() = configuration;
        *signaling = Some(active);
        Ok(())
    }

    async fn negotiate(
        self: &Arc<Self>,
        transcode: Option<TranscodeSpec>,
    ) -> SessionResult<MediaDescription> {
        let ports = self.reserve_transcoder_ports().await?;
        let description = self.invite().await?;
        self.activate()?;

        self.apply_rtcp_mux(&description);
        let transports = self.transports.lock().clone();
        self.watch_first_packets(&transports);

        if let Some(spec) = transcode {
            self.start_transcoder(&spec, &description, ports, &transports)
                .await?;
        }

        if description.is_ice_capable() {
            info!(session_id = %self.session_id, "Connecting using ICE");
            for kind in STREAMS {
                self.subscriptions
                    .add(install_stun_responder(&transports.rtp(kind)));
            }
            self.send_binding_requests(&description, &transports);
        } else {
            self.start_keepalive(description.clone());
        }

        Ok(description)
    }

    /// Video RTP/RTCP pair followed by the audio pair
    async fn reserve_transcoder_ports(&self) -> SessionResult<ReservedPorts> {
        let ports = self.collaborators.ports.reserve_ports(4).await?;
        let reserved = match ports.as_slice() {
            [video, _, audio, _, ..] => ReservedPorts {
                audio: *audio,
                video: *video,
            },
            _ => {
                return Err(TransportError::PortReservation(format!(
                    "expected 4 ports, got {}",
                    ports.len()
                ))
                .into())
            }
        };

        debug!(
            session_id = %self.session_id,
            audio_port = reserved.audio,
            video_port = reserved.video,
            "Reserved transcoder ports"
        );
        *self.reserved_ports.lock() = Some(reserved);
        Ok(reserved)
    }

    /// Invite, refreshing the signaling session while it reports expiry
    async fn invite(self: &Arc<Self>) -> SessionResult<MediaDescription> {
        let mut refreshes = 0u32;
        loop {
            let client = self.signaling_client()?;
            match client.invite().await {
                Ok(description) => return Ok(description),
                Err(SignalingError::ExpiredSession) => {
                    if !self.options.refresh_policy.allows(refreshes + 1) {
                        return Err(SessionError::RefreshLimitExceeded {
                            attempts: refreshes,
                        });
                    }
                    refreshes += 1;
                    warn!(
                        session_id = %self.session_id,
                        refresh = refreshes,
                        "Signaling session expired, refreshing parameters"
                    );

                    let current = self.configuration.lock().clone();
                    let signaling = current
                        .device
                        .refreshed_signaling_parameters(&current.signaling.session_id)
                        .await?;
                    self.replace_signaling_client(current.with_signaling(signaling))?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn apply_rtcp_mux(&self, description: &MediaDescription) {
        let mut transports = self.transports.lock();
        if self.state() == CallLifecycleState::Ended {
            return;
        }
        for kind in STREAMS {
            if description.stream(kind).is_rtcp_muxed() && transports.mux_rtcp(kind) {
                info!(session_id = %self.session_id, stream = %kind, "Remote muxes RTCP onto RTP");
            }
        }
    }

    /// Log the first inbound packet of each stream
    fn watch_first_packets(&self, transports: &SessionTransports) {
        for kind in STREAMS {
            let mut packets = transports.rtp(kind).subscribe();
            let session_id = self.session_id;
            let task = tokio::spawn(async move {
                match packets.recv().await {
                    Ok(packet) => {
                        info!(session_id = %session_id, stream = %kind, from = %packet.from, "Stream latched")
                    }
                    Err(RecvError::Lagged(_)) => {
                        info!(session_id = %session_id, stream = %kind, "Stream latched")
                    }
                    Err(RecvError::Closed) => {}
                }
            });
            self.subscriptions.add(Subscription::from_task(task));
        }
    }

    async fn start_transcoder(
        self: &Arc<Self>,
        spec: &TranscodeSpec,
        description: &MediaDescription,
        ports: ReservedPorts,
        transports: &SessionTransports,
    ) -> SessionResult<()> {
        let include_video = spec.video.is_enabled();
        let weak = Arc::downgrade(self);
        let process = self.collaborators.transcoder.launch(TranscodeLaunch {
            binary: self.options.transcoder_binary.clone(),
            args: spec.process_args(),
            label: format!("transcoder {}", self.session_id),
            on_exit: Box::new(move |code| {
                if let Some(inner) = weak.upgrade() {
                    warn!(session_id = %inner.session_id, code = ?code, "Transcoder exited, ending call");
                    tokio::spawn(async move { inner.end_call(true).await });
                }
            }),
        })?;

        // The bridge is stopped only by the call ending
        let ended = self.call_ended.listener();
        let bridge = process.clone();
        tokio::spawn(async move {
            ended.wait().await;
            bridge.stop();
        });

        let mut kinds = vec![StreamKind::Audio];
        if include_video {
            kinds.push(StreamKind::Video);
        }
        for kind in kinds {
            self.subscriptions.add(
                transports
                    .rtp(kind)
                    .add_packet_handler(forward_to_transcoder(ports.rtp(kind))),
            );
            // A muxed RTCP arrives on the RTP splitter and follows the RTP route
            if let Some(rtcp) = transports.owned_rtcp(kind) {
                self.subscriptions
                    .add(rtcp.add_packet_handler(forward_to_transcoder(ports.rtcp(kind))));
            }
        }

        let document = transcoder_session_description(description, &ports, include_video);
        process.write_input(&document).await?;
        info!(
            session_id = %self.session_id,
            audio_port = ports.audio,
            video_port = ?include_video.then_some(ports.video),
            "Transcoder started"
        );
        Ok(())
    }

    fn start_keepalive(self: &Arc<Self>, description: MediaDescription) {
        let weak = Arc::downgrade(self);
        let period = self.options.keepalive_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.state() == CallLifecycleState::Ended {
                    break;
                }
                let transports = inner.transports.lock().clone();
                inner.send_binding_requests(&description, &transports);
            }
        });
        self.subscriptions.add(Subscription::from_task(task));
    }

    fn send_binding_requests(&self, description: &MediaDescription, transports: &SessionTransports) {
        let Ok(client) = self.signaling_client() else {
            return;
        };

        for kind in STREAMS {
            let target = description.binding_target(kind);
            let rtp = transports.rtp(kind);
            let rtcp = transports.owned_rtcp(kind);
            let local_ufrag = client.local_ufrag(kind);
            let request = StunBindingRequest {
                rtp: rtp.as_ref(),
                rtcp: rtcp.as_deref(),
                target: &target,
                local_ufrag: local_ufrag.as_deref(),
                stream: kind,
            };
            if let Err(e) = send_stun_binding_request(request) {
                debug!(session_id = %self.session_id, stream = %kind, error = %e, "Failed to send STUN binding request");
            }
        }
    }

    /// Single teardown path. Runs once, whatever triggered it.
    async fn end_call(self: &Arc<Self>, send_termination: bool) {
        {
            let mut state = self.state.lock();
            if *state == CallLifecycleState::Ended {
                return;
            }
            *state = CallLifecycleState::Ended;
        }

        self.subscriptions.release_all();

        // Taken only after the state is Ended; see replace_signaling_client
        let signaling = self.signaling.lock().take();
        let client = signaling.as_ref().map(|active| active.client.clone());
        if send_termination {
            if let Some(client) = &client {
                if let Err(e) = client.send_termination().await {
                    error!(session_id = %self.session_id, error = %e, "Failed to send call termination");
                }
            }
        }

        self.call_ended.fire();

        if let Some(client) = client {
            client.destroy();
        }
        drop(signaling);
        self.transports.lock().close_all();

        info!(
            session_id = %self.session_id,
            by_remote = !send_termination,
            "Call ended"
        );
    }
}

fn forward_to_transcoder(port: u16) -> PacketHandler {
    Arc::new(move |packet: &InboundPacket| -> Option<ForwardTarget> {
        if packet.is_stun {
            None
        } else {
            Some(ForwardTarget::local(port))
        }
    })
}
