//! Transport splitters
//!
//! A splitter owns one bound UDP socket. Every inbound datagram is
//! classified (STUN or media), published to subscribers, and offered to the
//! registered handlers; the first handler that names a target gets the
//! datagram forwarded there.
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


use crate::error::{TransportError, TransportResult};
use crate::stun::is_stun_message;
use crate::subscription::Subscription;
use bytes::Bytes;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Largest datagram we accept
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Inbound packets buffered per subscriber before it starts lagging
const PACKET_CHANNEL_CAPACITY: usize = 256;

/// One received datagram
#[derive(Debug, Clone)]
pub struct InboundPacket {
    /// Datagram payload
    pub payload: Bytes,
    /// Sender address
    pub from: SocketAddr,
    /// Whether the payload parsed as a STUN message header
    pub is_stun: bool,
}

impl InboundPacket {
    /// Classify a received datagram
    pub fn new(payload: Bytes, from: SocketAddr) -> Self {
        let is_stun = is_stun_message(&payload);
        InboundPacket {
            payload,
            from,
            is_stun,
        }
    }
}

/// Where a handler wants a packet forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardTarget {
    /// Destination port
    pub port: u16,
    /// Destination address, loopback when unset
    pub address: Option<IpAddr>,
}

impl ForwardTarget {
    /// Forward to a port on the loopback interface
    pub fn local(port: u16) -> Self {
        ForwardTarget {
            port,
            address: None,
        }
    }

    /// Resolved destination
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(
            self.address.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            self.port,
        )
    }
}

/// Packet handler: returns a forward target, or `None` to pass
pub type PacketHandler = Arc<dyn Fn(&InboundPacket) -> Option<ForwardTarget> + Send + Sync>;

/// Ordered set of packet handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Mutex<Vec<(u64, PacketHandler)>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a handler; releasing the subscription removes it
    pub fn register(self: &Arc<Self>, handler: PacketHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers.lock().push((id, handler));

        let registry: Weak<HandlerRegistry> = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.handlers.lock().retain(|(handler_id, _)| *handler_id != id);
            }
        })
    }

    /// Run handlers in registration order until one returns a target
    pub fn dispatch(&self, packet: &InboundPacket) -> Option<ForwardTarget> {
        // Snapshot so handlers may register or send without holding the lock
        let handlers: Vec<PacketHandler> = self
            .handlers
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        handlers.iter().find_map(|handler| handler(packet))
    }

    /// Drop every handler
    pub fn clear(&self) {
        self.handlers.lock().clear();
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Whether no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A bound local endpoint for one RTP or RTCP stream
pub trait TransportSplitter: Send + Sync {
    /// Name used in logs
    fn label(&self) -> &str;

    /// Locally bound port
    fn local_port(&self) -> u16;

    /// Register a handler for inbound packets
    fn add_packet_handler(&self, handler: PacketHandler) -> Subscription;

    /// Stream of every inbound packet
    fn subscribe(&self) -> broadcast::Receiver<InboundPacket>;

    /// Send a datagram
    fn send(&self, payload: &[u8], destination: SocketAddr) -> TransportResult<()>;

    /// Close the socket and drop all handlers
    fn close(&self);

    /// Whether [`close`](Self::close) has been called
    fn is_closed(&self) -> bool;
}

/// UDP socket backed splitter
pub struct UdpSplitter {
    label: String,
    local_port: u16,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    handlers: Arc<HandlerRegistry>,
    packets: broadcast::Sender<InboundPacket>,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl UdpSplitter {
    /// Bind a socket and start receiving. Must be called inside a tokio runtime.
    pub async fn bind(addr: SocketAddr, label: impl Into<String>) -> TransportResult<Arc<Self>> {
        let label = label.into();
        let socket = UdpSocket::bind(addr).await
            .map_err(|e| TransportError::NetworkError(format!("Failed to bind UDP {}: {}", addr, e)))?;
        let socket = Arc::new(socket);
        let local_port = socket.local_addr()?.port();

        let (packets, _) = broadcast::channel(PACKET_CHANNEL_CAPACITY);
        let splitter = Arc::new(UdpSplitter {
            label: label.clone(),
            local_port,
            socket: Mutex::new(Some(socket.clone())),
            handlers: HandlerRegistry::new(),
            packets: packets.clone(),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(receive_loop(
            socket,
            splitter.handlers.clone(),
            packets,
            splitter.shutdown.clone(),
            label.clone(),
        ));

        info!(splitter = %label, port = local_port, "Transport splitter bound");
        Ok(splitter)
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    handlers: Arc<HandlerRegistry>,
    packets: broadcast::Sender<InboundPacket>,
    shutdown: CancellationToken,
    label: String,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => {
                    let packet = InboundPacket::new(Bytes::copy_from_slice(&buf[..len]), from);

                    // No subscribers is not an error
                    let _ = packets.send(packet.clone());

                    if let Some(target) = handlers.dispatch(&packet) {
                        // A handler snapshot can outlive close()
                        if shutdown.is_cancelled() {
                            break;
                        }
                        if let Err(e) = socket.try_send_to(&packet.payload, target.socket_addr()) {
                            debug!(
                                splitter = %label,
                                target = %target.socket_addr(),
                                error = %e,
                                "Failed to forward packet"
                            );
                        }
                    }
                }
                Err(e) => {
                    // ICMP unreachable from a previous send surfaces here on some platforms
                    debug!(splitter = %label, error = %e, "UDP receive error");
                }
            }
        }
    }

    handlers.clear();
    debug!(splitter = %label, "Receive loop stopped");
}

impl TransportSplitter for UdpSplitter {
    fn label(&self) -> &str {
        &self.label
    }

    fn local_port(&self) -> u16 {
        self.local_port
    }

    fn add_packet_handler(&self, handler: PacketHandler) -> Subscription {
        self.handlers.register(handler)
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundPacket> {
        self.packets.subscribe()
    }

    fn send(&self, payload: &[u8], destination: SocketAddr) -> TransportResult<()> {
        let socket = self
            .socket
            .lock()
            .clone()
            .ok_or_else(|| TransportError::Closed(self.label.clone()))?;
        socket.try_send_to(payload, destination)?;
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        self.handlers.clear();
        self.socket.lock().take();
        debug!(splitter = %self.label, port = self.local_port, "Transport splitter closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for UdpSplitter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
