//! In-memory collaborators for session tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use call_session::{
    Device, ExitCallback, LocalRtpOptions, LocalStreamOptions, MediaDescription, OnceListener,
    OnceSignal, SessionCollaborators, SessionConfiguration, SessionError, SessionOptions,
    SessionOrchestrator, SessionResult, SessionTransports, SignalingClient, SignalingConnector,
    SignalingError, SignalingParameters, SrtpCrypto, StreamDescription, TranscodeLaunch,
    TranscodeLauncher, TranscodeProcess,
};
use media_transport::{
    ForwardTarget, HandlerRegistry, InboundPacket, PacketHandler, PortReserver, StreamKind,
    StunMessage, Subscription, TransportError, TransportResult, TransportSplitter,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const REMOTE_ADDRESS: &str = "203.0.113.10";

/// Splitter that records sends and closes instead of touching sockets
pub struct RecordingSplitter {
    label: String,
    port: u16,
    handlers: Arc<HandlerRegistry>,
    packets: broadcast::Sender<InboundPacket>,
    sent: Mutex<Vec<(Bytes, SocketAddr)>>,
    closes: AtomicUsize,
    closed: AtomicBool,
}

impl RecordingSplitter {
    pub fn new(label: &str, port: u16) -> Arc<Self> {
        let (packets, _) = broadcast::channel(16);
        Arc::new(RecordingSplitter {
            label: label.to_string(),
            port,
            handlers: HandlerRegistry::new(),
            packets,
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Feed an inbound packet; returns where the handlers would forward it
    pub fn deliver(&self, packet: InboundPacket) -> Option<ForwardTarget> {
        let _ = self.packets.send(packet.clone());
        self.handlers.dispatch(&packet)
    }

    pub fn sent(&self) -> Vec<(Bytes, SocketAddr)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Live receivers of the inbound packet feed
    pub fn subscriber_count(&self) -> usize {
        self.packets.receiver_count()
    }
}

impl TransportSplitter for RecordingSplitter {
    fn label(&self) -> &str {
        &self.label
    }

    fn local_port(&self) -> u16 {
        self.port
    }

    fn add_packet_handler(&self, handler: PacketHandler) -> Subscription {
        self.handlers.register(handler)
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundPacket> {
        self.packets.subscribe()
    }

    fn send(&self, payload: &[u8], destination: SocketAddr) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed(self.label.clone()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((Bytes::copy_from_slice(payload), destination));
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        self.handlers.clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Signaling client whose invite outcome is fixed up front
pub struct ScriptedClient {
    pub index: usize,
    pub parameters: SignalingParameters,
    outcome: Result<MediaDescription, SignalingError>,
    pub invites: AtomicUsize,
    pub terminations: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub key_frames: AtomicUsize,
    pub speaker_activations: AtomicUsize,
    ended: OnceSignal,
}

impl ScriptedClient {
    /// Simulate the remote hanging up
    pub fn end_by_remote(&self) {
        self.ended.fire();
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignalingClient for ScriptedClient {
    async fn invite(&self) -> Result<MediaDescription, SignalingError> {
        self.invites.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }

    async fn send_termination(&self) -> Result<(), SignalingError> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    async fn request_key_frame(&self) -> Result<(), SignalingError> {
        self.key_frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn activate_speaker(&self) -> Result<(), SignalingError> {
        self.speaker_activations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn local_ufrag(&self, stream: StreamKind) -> Option<String> {
        Some(format!("local-{}", stream))
    }

    fn ended_by_remote(&self) -> OnceListener {
        self.ended.listener()
    }
}

/// Hands out clients with one scripted invite outcome each
pub struct ScriptedConnector {
    outcomes: Mutex<VecDeque<Result<MediaDescription, SignalingError>>>,
    clients: Mutex<Vec<Arc<ScriptedClient>>>,
    connect_delay: Mutex<Option<Duration>>,
}

impl ScriptedConnector {
    pub fn new(outcomes: Vec<Result<MediaDescription, SignalingError>>) -> Arc<Self> {
        Arc::new(ScriptedConnector {
            outcomes: Mutex::new(outcomes.into()),
            clients: Mutex::new(Vec::new()),
            connect_delay: Mutex::new(None),
        })
    }

    /// Block the calling thread this long in every later `connect`
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

    pub fn clients(&self) -> Vec<Arc<ScriptedClient>> {
        self.clients.lock().unwrap().clone()
    }

    pub fn client(&self, index: usize) -> Arc<ScriptedClient> {
        self.clients()[index].clone()
    }

    pub fn latest(&self) -> Arc<ScriptedClient> {
        self.clients().last().cloned().unwrap()
    }
}

impl SignalingConnector for ScriptedConnector {
    fn connect(
        &self,
        configuration: &SessionConfiguration,
    ) -> SessionResult<Arc<dyn SignalingClient>> {
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SignalingError::Failed("no scripted outcome".to_string())));
        let mut clients = self.clients.lock().unwrap();
        let client = Arc::new(ScriptedClient {
            index: clients.len(),
            parameters: configuration.signaling.clone(),
            outcome,
            invites: AtomicUsize::new(0),
            terminations: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            key_frames: AtomicUsize::new(0),
            speaker_activations: AtomicUsize::new(0),
            ended: OnceSignal::new(),
        });
        clients.push(client.clone());
        Ok(client)
    }
}

/// Device that hands out numbered session tickets
pub struct TestDevice {
    pub refreshes: AtomicUsize,
}

impl TestDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(TestDevice {
            refreshes: AtomicUsize::new(0),
        })
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Device for TestDevice {
    fn name(&self) -> &str {
        "Front Door"
    }

    async fn refreshed_signaling_parameters(
        &self,
        _session_id: &str,
    ) -> Result<SignalingParameters, SignalingError> {
        let refresh = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(signaling_parameters(&format!("refreshed-{}", refresh)))
    }
}

/// Port reserver returning a fixed run starting at 40000
pub struct FixedPorts {
    pub calls: AtomicUsize,
}

#[async_trait]
impl PortReserver for FixedPorts {
    async fn reserve_ports(&self, count: usize) -> TransportResult<Vec<u16>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((40000..40000 + count as u16).collect())
    }
}

/// Transcoder stand-in recording its input and stops
#[derive(Default)]
pub struct RecordingProcess {
    pub inputs: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
}

impl RecordingProcess {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn document(&self) -> String {
        self.inputs.lock().unwrap().first().cloned().unwrap_or_default()
    }
}

#[async_trait]
impl TranscodeProcess for RecordingProcess {
    async fn write_input(&self, text: &str) -> SessionResult<()> {
        self.inputs.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    pub process: Arc<RecordingProcess>,
    pub launches: Mutex<Vec<(PathBuf, Vec<String>)>>,
    on_exit: Mutex<Option<ExitCallback>>,
}

impl RecordingLauncher {
    pub fn args(&self) -> Vec<String> {
        self.launches
            .lock()
            .unwrap()
            .first()
            .map(|(_, args)| args.clone())
            .unwrap_or_default()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    /// Simulate the process exiting on its own
    pub fn exit(&self, code: Option<i32>) {
        let callback = self.on_exit.lock().unwrap().take();
        if let Some(callback) = callback {
            callback(code);
        }
    }
}

impl TranscodeLauncher for RecordingLauncher {
    fn launch(&self, launch: TranscodeLaunch) -> SessionResult<Arc<dyn TranscodeProcess>> {
        if launch.binary.as_os_str().is_empty() {
            return Err(SessionError::Transcode("no binary".to_string()));
        }
        self.launches
            .lock()
            .unwrap()
            .push((launch.binary.clone(), launch.args.clone()));
        *self.on_exit.lock().unwrap() = Some(launch.on_exit);
        Ok(self.process.clone())
    }
}

/// All collaborators of one session under test
pub struct Harness {
    pub audio_rtp: Arc<RecordingSplitter>,
    pub audio_rtcp: Arc<RecordingSplitter>,
    pub video_rtp: Arc<RecordingSplitter>,
    pub video_rtcp: Arc<RecordingSplitter>,
    pub connector: Arc<ScriptedConnector>,
    pub device: Arc<TestDevice>,
    pub ports: Arc<FixedPorts>,
    pub launcher: Arc<RecordingLauncher>,
}

impl Harness {
    pub fn new(outcomes: Vec<Result<MediaDescription, SignalingError>>) -> Self {
        Harness {
            audio_rtp: RecordingSplitter::new("audio rtp", 50000),
            audio_rtcp: RecordingSplitter::new("audio rtcp", 50001),
            video_rtp: RecordingSplitter::new("video rtp", 50002),
            video_rtcp: RecordingSplitter::new("video rtcp", 50003),
            connector: ScriptedConnector::new(outcomes),
            device: TestDevice::new(),
            ports: Arc::new(FixedPorts {
                calls: AtomicUsize::new(0),
            }),
            launcher: Arc::new(RecordingLauncher::default()),
        }
    }

    pub fn configuration(&self) -> SessionConfiguration {
        let stream = |rtp_port: u16, ssrc: u32| LocalStreamOptions {
            rtp_port,
            rtcp_port: rtp_port + 1,
            ssrc,
            crypto: None,
        };
        SessionConfiguration {
            signaling: signaling_parameters("initial"),
            rtp: LocalRtpOptions {
                audio: stream(50000, 1111),
                video: stream(50002, 2222),
            },
            tls_port: 5061,
            device: self.device.clone(),
        }
    }

    pub fn session(&self) -> SessionOrchestrator {
        self.session_with(SessionOptions::default())
    }

    pub fn session_with(&self, options: SessionOptions) -> SessionOrchestrator {
        let transports = SessionTransports::new(
            self.audio_rtp.clone(),
            self.audio_rtcp.clone(),
            self.video_rtp.clone(),
            self.video_rtcp.clone(),
        );
        let collaborators = SessionCollaborators {
            connector: self.connector.clone(),
            ports: self.ports.clone(),
            transcoder: self.launcher.clone(),
        };
        SessionOrchestrator::new(self.configuration(), transports, collaborators, options)
            .expect("session")
    }

    pub fn splitters(&self) -> [&Arc<RecordingSplitter>; 4] {
        [&self.audio_rtp, &self.audio_rtcp, &self.video_rtp, &self.video_rtcp]
    }
}

pub fn signaling_parameters(session_id: &str) -> SignalingParameters {
    SignalingParameters {
        session_id: session_id.to_string(),
        from: "sip:client@ring.local".to_string(),
        to: "sip:camera@ring.local".to_string(),
        local_ip: "192.168.1.20".parse().unwrap(),
    }
}

/// Remote description with distinct RTP/RTCP ports, optionally muxed or
/// ICE capable
pub fn description(ice: bool, audio_muxed: bool, video_muxed: bool) -> MediaDescription {
    let stream = |port: u16, muxed: bool| StreamDescription {
        port,
        rtcp_port: if muxed { port } else { port + 1 },
        ssrc: None,
        ice_ufrag: ice.then(|| format!("remote{}", port)),
        ice_pwd: ice.then(|| "remote-password".to_string()),
        crypto: Some(SrtpCrypto::new(vec![3; 16], vec![5; 14])),
    };
    MediaDescription {
        address: REMOTE_ADDRESS.parse().unwrap(),
        audio: stream(6000, audio_muxed),
        video: stream(6002, video_muxed),
    }
}

pub fn stun_packet() -> InboundPacket {
    let request = StunMessage::binding_request().encode(None, false).unwrap();
    InboundPacket::new(request, "198.51.100.9:7000".parse().unwrap())
}

pub fn rtp_packet() -> InboundPacket {
    InboundPacket::new(
        Bytes::from_static(&[0x80, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0, 0, 1]),
        "198.51.100.9:7000".parse().unwrap(),
    )
}

/// Let spawned tasks run
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub async fn advance(millis: u64) {
    tokio::time::advance(Duration::from_millis(millis)).await;
    settle().await;
}

/// Same underlying splitter, ignoring vtable identity
pub fn same_splitter(a: &Arc<dyn TransportSplitter>, b: &Arc<RecordingSplitter>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}
