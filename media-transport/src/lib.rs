//! Media transport for camera calls
//!
//! UDP splitters that demultiplex RTP/RTCP/STUN traffic, the STUN binding
//! helpers used for NAT keepalive and ICE connectivity checks, and local
//! port reservation.
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
pub mod ports;
pub mod splitter;
pub mod stun;
pub mod subscription;

pub use error::{TransportError, TransportResult};
pub use ports::{PortReserver, UdpPortReserver};
pub use splitter::{
    ForwardTarget, HandlerRegistry, InboundPacket, PacketHandler, TransportSplitter, UdpSplitter,
};
pub use stun::{
    install_stun_responder, is_stun_message, send_stun_binding_request, BindingTarget,
    StreamKind, StunBindingRequest, StunMessage, StunMessageType,
};
pub use subscription::{Subscription, SubscriptionSet};
