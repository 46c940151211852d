//! STUN binding support for NAT traversal
//!
//! Implements the slice of RFC 5389 a media session needs: binding
//! requests that keep NAT mappings open (optionally authenticated with ICE
//! credentials), and a responder that answers the remote's connectivity
//! checks with its reflexive address.
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
use crate::splitter::{ForwardTarget, InboundPacket, TransportSplitter};
use crate::subscription::Subscription;
use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use tracing::debug;

/// STUN magic cookie (RFC 5389)
pub const STUN_MAGIC_COOKIE: u32 = 0x2112A442;

/// Fixed STUN header size
pub const STUN_HEADER_SIZE: usize = 20;

/// XOR applied to the FINGERPRINT checksum ("STUN")
const STUN_FINGERPRINT_XOR: u32 = 0x5354554e;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

type HmacSha1 = Hmac<Sha1>;

/// Longest USERNAME value allowed on the wire (RFC 5389 section 15.3)
pub const MAX_USERNAME_LEN: usize = 512;

/// Attribute type codes used by binding transactions
pub mod attribute {
    pub const MAPPED_ADDRESS: u16 = 0x0001;
    pub const USERNAME: u16 = 0x0006;
    pub const MESSAGE_INTEGRITY: u16 = 0x0008;
    pub const XOR_MAPPED_ADDRESS: u16 = 0x0020;
    pub const FINGERPRINT: u16 = 0x8028;
}

/// Media stream a transport belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Audio,
    Video,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Audio => f.write_str("audio"),
            StreamKind::Video => f.write_str("video"),
        }
    }
}

/// STUN message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StunMessageType {
    /// Binding request
    BindingRequest,
    /// Binding success response
    BindingResponse,
    /// Binding error response
    BindingErrorResponse,
    /// Anything else (indications, TURN methods)
    Other(u16),
}

impl StunMessageType {
    fn to_u16(self) -> u16 {
        match self {
            StunMessageType::BindingRequest => 0x0001,
            StunMessageType::BindingResponse => 0x0101,
            StunMessageType::BindingErrorResponse => 0x0111,
            StunMessageType::Other(value) => value,
        }
    }

    fn from_u16(value: u16) -> Self {
        match value {
            0x0001 => StunMessageType::BindingRequest,
            0x0101 => StunMessageType::BindingResponse,
            0x0111 => StunMessageType::BindingErrorResponse,
            other => StunMessageType::Other(other),
        }
    }
}

/// STUN attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunAttribute {
    /// Attribute type
    pub attribute_type: u16,
    /// Attribute value (unpadded)
    pub value: Bytes,
}

/// STUN message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StunMessage {
    /// Message type (request, response, etc.)
    pub message_type: StunMessageType,
    /// Transaction ID
    pub transaction_id: [u8; 12],
    /// Attributes in wire order
    pub attributes: Vec<StunAttribute>,
}

impl StunMessage {
    /// New binding request with a random transaction id
    pub fn binding_request() -> Self {
        let mut transaction_id = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut transaction_id);
        StunMessage {
            message_type: StunMessageType::BindingRequest,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Success response to `request`, reporting `client_addr` as seen here
    pub fn binding_response(request: &StunMessage, client_addr: SocketAddr) -> Self {
        StunMessage {
            message_type: StunMessageType::BindingResponse,
            transaction_id: request.transaction_id,
            attributes: vec![StunAttribute {
                attribute_type: attribute::XOR_MAPPED_ADDRESS,
                value: Bytes::from(encode_xor_address(client_addr, &request.transaction_id)),
            }],
        }
    }

    /// Append a USERNAME attribute
    pub fn with_username(mut self, username: &str) -> Self {
        self.attributes.push(StunAttribute {
            attribute_type: attribute::USERNAME,
            value: Bytes::copy_from_slice(username.as_bytes()),
        });
        self
    }

    /// First attribute of the given type
    pub fn attribute(&self, attribute_type: u16) -> Option<&StunAttribute> {
        self.attributes
            .iter()
            .find(|attr| attr.attribute_type == attribute_type)
    }

    /// USERNAME attribute as text
    pub fn username(&self) -> Option<&str> {
        self.attribute(attribute::USERNAME)
            .and_then(|attr| std::str::from_utf8(&attr.value).ok())
    }

    /// Decoded XOR-MAPPED-ADDRESS attribute
    pub fn xor_mapped_address(&self) -> Option<SocketAddr> {
        self.attribute(attribute::XOR_MAPPED_ADDRESS)
            .and_then(|attr| decode_xor_address(&attr.value, &self.transaction_id))
    }

    /// Serialize the message.
    ///
    /// With an `integrity_key`, MESSAGE-INTEGRITY (HMAC-SHA1) is appended;
    /// with `fingerprint`, FINGERPRINT goes last. Fails when an attribute
    /// or the whole body does not fit its 16-bit length field.
    pub fn encode(&self, integrity_key: Option<&[u8]>, fingerprint: bool) -> TransportResult<Bytes> {
        let mut attrs = BytesMut::new();
        for attr in &self.attributes {
            // Trailer attributes are recomputed below
            if attr.attribute_type == attribute::MESSAGE_INTEGRITY
                || attr.attribute_type == attribute::FINGERPRINT
            {
                continue;
            }
            if attr.attribute_type == attribute::USERNAME && attr.value.len() > MAX_USERNAME_LEN {
                return Err(TransportError::StunError(format!(
                    "USERNAME is {} bytes, limit is {}",
                    attr.value.len(),
                    MAX_USERNAME_LEN
                )));
            }
            put_attribute(&mut attrs, attr.attribute_type, &attr.value)?;
        }

        if let Some(key) = integrity_key {
            // Length covers MESSAGE-INTEGRITY itself but not FINGERPRINT
            let header = self.header(attrs.len() + 24)?;
            let mut mac = HmacSha1::new_from_slice(key)
                .map_err(|e| TransportError::StunError(format!("Invalid integrity key: {}", e)))?;
            mac.update(&header);
            mac.update(&attrs);
            let digest = mac.finalize().into_bytes();
            put_attribute(&mut attrs, attribute::MESSAGE_INTEGRITY, &digest)?;
        }

        if fingerprint {
            let header = self.header(attrs.len() + 8)?;
            let mut digest = CRC32.digest();
            digest.update(&header);
            digest.update(&attrs);
            let crc = digest.finalize() ^ STUN_FINGERPRINT_XOR;
            put_attribute(&mut attrs, attribute::FINGERPRINT, &crc.to_be_bytes())?;
        }

        let mut buf = BytesMut::with_capacity(STUN_HEADER_SIZE + attrs.len());
        buf.put_slice(&self.header(attrs.len())?);
        buf.put_slice(&attrs);
        Ok(buf.freeze())
    }

    /// Parse a message from a datagram
    pub fn decode(data: &[u8]) -> TransportResult<Self> {
        if !is_stun_message(data) {
            return Err(TransportError::StunError(
                "Not a STUN message".to_string(),
            ));
        }

        let message_type = StunMessageType::from_u16(u16::from_be_bytes([data[0], data[1]]));
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if data.len() < STUN_HEADER_SIZE + length {
            return Err(TransportError::StunError(format!(
                "Truncated STUN message: declared {} attribute bytes, got {}",
                length,
                data.len() - STUN_HEADER_SIZE
            )));
        }

        let mut transaction_id = [0u8; 12];
        transaction_id.copy_from_slice(&data[8..20]);

        let mut attributes = Vec::new();
        let mut body = &data[STUN_HEADER_SIZE..STUN_HEADER_SIZE + length];
        while !body.is_empty() {
            if body.len() < 4 {
                return Err(TransportError::StunError(
                    "Truncated STUN attribute header".to_string(),
                ));
            }
            let attribute_type = u16::from_be_bytes([body[0], body[1]]);
            let value_len = u16::from_be_bytes([body[2], body[3]]) as usize;
            let padded_len = (value_len + 3) & !3;
            if body.len() < 4 + value_len {
                return Err(TransportError::StunError(format!(
                    "Truncated STUN attribute 0x{:04x}",
                    attribute_type
                )));
            }
            attributes.push(StunAttribute {
                attribute_type,
                value: Bytes::copy_from_slice(&body[4..4 + value_len]),
            });
            body = &body[(4 + padded_len).min(body.len())..];
        }

        Ok(StunMessage {
            message_type,
            transaction_id,
            attributes,
        })
    }

    fn header(&self, attributes_len: usize) -> TransportResult<[u8; STUN_HEADER_SIZE]> {
        let length = u16::try_from(attributes_len).map_err(|_| {
            TransportError::StunError(format!("STUN body of {} bytes is too long", attributes_len))
        })?;
        let mut header = [0u8; STUN_HEADER_SIZE];
        header[0..2].copy_from_slice(&self.message_type.to_u16().to_be_bytes());
        header[2..4].copy_from_slice(&length.to_be_bytes());
        header[4..8].copy_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
        header[8..20].copy_from_slice(&self.transaction_id);
        Ok(header)
    }
}

fn put_attribute(buf: &mut BytesMut, attribute_type: u16, value: &[u8]) -> TransportResult<()> {
    let length = u16::try_from(value.len()).map_err(|_| {
        TransportError::StunError(format!(
            "Attribute 0x{:04x} of {} bytes is too long",
            attribute_type,
            value.len()
        ))
    })?;
    buf.put_u16(attribute_type);
    buf.put_u16(length);
    buf.put_slice(value);
    let padding = (4 - value.len() % 4) % 4;
    buf.put_bytes(0, padding);
    Ok(())
}

/// Whether a datagram is a STUN message (RFC 5389 section 6)
pub fn is_stun_message(data: &[u8]) -> bool {
    if data.len() < STUN_HEADER_SIZE {
        return false;
    }

    // Top two bits are zero for STUN, RTP/RTCP always set version 2 there
    if data[0] & 0xC0 != 0 {
        return false;
    }

    let magic = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    magic == STUN_MAGIC_COOKIE
}

/// Encode an XOR-MAPPED-ADDRESS value
fn encode_xor_address(addr: SocketAddr, transaction_id: &[u8; 12]) -> Vec<u8> {
    let cookie = STUN_MAGIC_COOKIE.to_be_bytes();
    let mut bytes = Vec::with_capacity(20);

    bytes.push(0); // Reserved
    let xor_port = addr.port() ^ (STUN_MAGIC_COOKIE >> 16) as u16;
    match addr.ip() {
        IpAddr::V4(v4) => {
            bytes.push(0x01);
            bytes.extend_from_slice(&xor_port.to_be_bytes());
            for (i, octet) in v4.octets().iter().enumerate() {
                bytes.push(octet ^ cookie[i]);
            }
        }
        IpAddr::V6(v6) => {
            bytes.push(0x02);
            bytes.extend_from_slice(&xor_port.to_be_bytes());
            for (i, octet) in v6.octets().iter().enumerate() {
                let mask = if i < 4 { cookie[i] } else { transaction_id[i - 4] };
                bytes.push(octet ^ mask);
            }
        }
    }

    bytes
}

fn decode_xor_address(value: &[u8], transaction_id: &[u8; 12]) -> Option<SocketAddr> {
    if value.len() < 8 {
        return None;
    }
    let cookie = STUN_MAGIC_COOKIE.to_be_bytes();
    let port = u16::from_be_bytes([value[2], value[3]]) ^ (STUN_MAGIC_COOKIE >> 16) as u16;
    let ip = match value[1] {
        0x01 => {
            let mut octets = [0u8; 4];
            for (i, octet) in octets.iter_mut().enumerate() {
                *octet = value[4 + i] ^ cookie[i];
            }
            IpAddr::from(octets)
        }
        0x02 if value.len() >= 20 => {
            let mut octets = [0u8; 16];
            for (i, octet) in octets.iter_mut().enumerate() {
                let mask = if i < 4 { cookie[i] } else { transaction_id[i - 4] };
                *octet = value[4 + i] ^ mask;
            }
            IpAddr::from(octets)
        }
        _ => return None,
    };
    Some(SocketAddr::new(ip, port))
}

/// Where binding requests for one stream are sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingTarget {
    /// Remote media address
    pub address: IpAddr,
    /// Remote RTP port
    pub rtp_port: u16,
    /// Remote RTCP port
    pub rtcp_port: u16,
    /// Remote ICE user fragment
    pub ice_ufrag: Option<String>,
    /// Remote ICE password
    pub ice_pwd: Option<String>,
}

/// Arguments for [`send_stun_binding_request`]
pub struct StunBindingRequest<'a> {
    /// Splitter carrying the stream's RTP
    pub rtp: &'a dyn TransportSplitter,
    /// Splitter carrying the stream's RTCP, when it has its own socket
    pub rtcp: Option<&'a dyn TransportSplitter>,
    /// Remote endpoint
    pub target: &'a BindingTarget,
    /// Our ICE user fragment for this stream
    pub local_ufrag: Option<&'a str>,
    /// Stream the request belongs to (for logging)
    pub stream: StreamKind,
}

/// Build one binding request, authenticated when ICE credentials are known
fn build_binding_request(target: &BindingTarget, local_ufrag: Option<&str>) -> TransportResult<Bytes> {
    match (&target.ice_ufrag, &target.ice_pwd, local_ufrag) {
        (Some(remote_ufrag), Some(remote_pwd), Some(local_ufrag)) => {
            StunMessage::binding_request()
                .with_username(&format!("{}:{}", remote_ufrag, local_ufrag))
                .encode(Some(remote_pwd.as_bytes()), true)
        }
        _ => StunMessage::binding_request().encode(None, false),
    }
}

/// Send a binding request on the RTP splitter and, if given, the RTCP one
pub fn send_stun_binding_request(request: StunBindingRequest<'_>) -> TransportResult<()> {
    let target = request.target;

    let rtp_message = build_binding_request(target, request.local_ufrag)?;
    request
        .rtp
        .send(&rtp_message, SocketAddr::new(target.address, target.rtp_port))?;

    if let Some(rtcp) = request.rtcp {
        let rtcp_message = build_binding_request(target, request.local_ufrag)?;
        rtcp.send(&rtcp_message, SocketAddr::new(target.address, target.rtcp_port))?;
    }

    debug!(
        stream = %request.stream,
        remote = %target.address,
        rtp_port = target.rtp_port,
        rtcp_port = target.rtcp_port,
        "Sent STUN binding request"
    );
    Ok(())
}

/// Answer inbound binding requests on `splitter`.
///
/// The handler never forwards anything; it only replies. Dropping or
/// cancelling the returned subscription removes it.
pub fn install_stun_responder(splitter: &Arc<dyn TransportSplitter>) -> Subscription {
    let weak: Weak<dyn TransportSplitter> = Arc::downgrade(splitter);
    splitter.add_packet_handler(Arc::new(move |packet: &InboundPacket| -> Option<ForwardTarget> {
        if !packet.is_stun {
            return None;
        }
        let Some(splitter) = weak.upgrade() else {
            return None;
        };
        if let Err(e) = respond_to_binding(splitter.as_ref(), packet) {
            debug!(
                splitter = splitter.label(),
                from = %packet.from,
                error = %e,
                "Failed to answer STUN packet"
            );
        }
        None
    }))
}

fn respond_to_binding(splitter: &dyn TransportSplitter, packet: &InboundPacket) -> TransportResult<()> {
    let request = StunMessage::decode(&packet.payload)?;
    if request.message_type != StunMessageType::BindingRequest {
        return Ok(());
    }
    let response = StunMessage::binding_response(&request, packet.from).encode(None, true)?;
    splitter.send(&response, packet.from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn create_test_addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)), port)
    }

    #[test]
    fn test_is_stun_message() {
        let request = StunMessage::binding_request().encode(None, false).unwrap();
        assert!(is_stun_message(&request));

        // Too short
        assert!(!is_stun_message(&[0u8; 10]));

        // RTP version 2 header with a cookie-looking timestamp
        let mut rtp = vec![0u8; 40];
        rtp[0] = 0x80;
        rtp[4..8].copy_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
        assert!(!is_stun_message(&rtp));
    }

    #[test]
    fn test_binding_response_maps_address() {
        let request = StunMessage::binding_request();
        let client = create_test_addr(50000);
        let encoded = StunMessage::binding_response(&request, client).encode(None, true).unwrap();

        let decoded = StunMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.message_type, StunMessageType::BindingResponse);
        assert_eq!(decoded.transaction_id, request.transaction_id);
        assert_eq!(decoded.xor_mapped_address(), Some(client));
        assert!(decoded.attribute(attribute::FINGERPRINT).is_some());
    }

    #[test]
    fn test_xor_address_ipv6() {
        let request = StunMessage::binding_request();
        let client = SocketAddr::new(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 7)), 40000);
        let response = StunMessage::binding_response(&request, client);
        assert_eq!(response.xor_mapped_address(), Some(client));
    }

    #[test]
    fn test_authenticated_request_layout() {
        let target = BindingTarget {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            rtp_port: 4000,
            rtcp_port: 4001,
            ice_ufrag: Some("remote".to_string()),
            ice_pwd: Some("secret-password".to_string()),
        };
        let encoded = build_binding_request(&target, Some("local")).unwrap();
        let decoded = StunMessage::decode(&encoded).unwrap();

        assert_eq!(decoded.username(), Some("remote:local"));
        let types: Vec<u16> = decoded.attributes.iter().map(|a| a.attribute_type).collect();
        assert_eq!(
            types,
            vec![attribute::USERNAME, attribute::MESSAGE_INTEGRITY, attribute::FINGERPRINT]
        );

        // FINGERPRINT covers everything before it
        let fingerprint_offset = encoded.len() - 8;
        let expected = CRC32.checksum(&{
            let mut covered = encoded[..fingerprint_offset].to_vec();
            covered[2..4].copy_from_slice(&((encoded.len() - STUN_HEADER_SIZE) as u16).to_be_bytes());
            covered
        }) ^ STUN_FINGERPRINT_XOR;
        assert_eq!(&encoded[fingerprint_offset + 4..], &expected.to_be_bytes());
    }

    #[test]
    fn test_unauthenticated_request_has_no_attributes() {
        let target = BindingTarget {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            rtp_port: 4000,
            rtcp_port: 4001,
            ice_ufrag: None,
            ice_pwd: None,
        };
        let encoded = build_binding_request(&target, Some("local")).unwrap();
        assert_eq!(encoded.len(), STUN_HEADER_SIZE);
        let decoded = StunMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.message_type, StunMessageType::BindingRequest);
        assert!(decoded.attributes.is_empty());
    }

    #[tokio::test]
    async fn test_responder_answers_binding_requests() {
        use crate::splitter::UdpSplitter;
        use std::time::Duration;
        use tokio::net::UdpSocket;

        let loopback = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let splitter: Arc<dyn TransportSplitter> = UdpSplitter::bind(loopback, "responder").await.unwrap();
        let _responder = install_stun_responder(&splitter);

        let client = UdpSocket::bind(loopback).await.unwrap();
        let request = StunMessage::binding_request();
        client
            .send_to(
                &request.encode(None, false).unwrap(),
                SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), splitter.local_port()),
            )
            .await
            .unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .expect("binding response")
            .unwrap();
        let response = StunMessage::decode(&buf[..len]).unwrap();
        assert_eq!(response.message_type, StunMessageType::BindingResponse);
        assert_eq!(response.transaction_id, request.transaction_id);
        assert_eq!(response.xor_mapped_address(), Some(client.local_addr().unwrap()));

        splitter.close();
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let encoded = StunMessage::binding_request()
            .with_username("abc:def")
            .encode(None, false)
            .unwrap();
        assert!(StunMessage::decode(&encoded[..encoded.len() - 4]).is_err());
    }

    #[test]
    fn test_encode_rejects_oversized_username() {
        let username = "u".repeat(MAX_USERNAME_LEN + 1);
        let result = StunMessage::binding_request()
            .with_username(&username)
            .encode(None, false);
        assert!(matches!(result, Err(TransportError::StunError(_))));

        let username = "u".repeat(MAX_USERNAME_LEN);
        assert!(StunMessage::binding_request()
            .with_username(&username)
            .encode(Some(&b"key"[..]), true)
            .is_ok());
    }

    #[test]
    fn test_encode_rejects_attribute_longer_than_length_field() {
        let mut message = StunMessage::binding_request();
        message.attributes.push(StunAttribute {
            attribute_type: attribute::MAPPED_ADDRESS,
            value: Bytes::from(vec![0u8; u16::MAX as usize + 1]),
        });
        assert!(message.encode(None, false).is_err());
    }

    #[test]
    fn test_oversized_ufrag_fails_binding_request() {
        let target = BindingTarget {
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            rtp_port: 4000,
            rtcp_port: 4001,
            ice_ufrag: Some("r".repeat(MAX_USERNAME_LEN)),
            ice_pwd: Some("secret-password".to_string()),
        };
        assert!(build_binding_request(&target, Some("local")).is_err());
    }
}
