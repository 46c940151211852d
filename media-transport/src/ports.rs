//! Local UDP port reservation
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
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::debug;

/// Finds runs of free local UDP ports
#[async_trait]
pub trait PortReserver: Send + Sync {
    /// Reserve `count` consecutive ports, lowest first
    async fn reserve_ports(&self, count: usize) -> TransportResult<Vec<u16>>;
}

/// Probes the OS by binding candidate ports
#[derive(Debug, Clone)]
pub struct UdpPortReserver {
    bind_ip: IpAddr,
    max_attempts: usize,
}

impl Default for UdpPortReserver {
    fn default() -> Self {
        UdpPortReserver {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            max_attempts: 32,
        }
    }
}

impl UdpPortReserver {
    /// Probe ports on `bind_ip`
    pub fn new(bind_ip: IpAddr) -> Self {
        UdpPortReserver {
            bind_ip,
            ..Self::default()
        }
    }

    /// Limit how many base ports are tried
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    async fn try_run(&self, count: usize) -> TransportResult<Option<Vec<u16>>> {
        let first = UdpSocket::bind(SocketAddr::new(self.bind_ip, 0)).await?;
        let base = first.local_addr()?.port();
        if base as usize + count - 1 > u16::MAX as usize {
            return Ok(None);
        }

        let mut held = vec![first];
        for offset in 1..count as u16 {
            match UdpSocket::bind(SocketAddr::new(self.bind_ip, base + offset)).await {
                Ok(socket) => held.push(socket),
                Err(_) => return Ok(None),
            }
        }

        // Sockets are released here; the caller's process binds them next
        drop(held);
        Ok(Some((base..base + count as u16).collect()))
    }
}

#[async_trait]
impl PortReserver for UdpPortReserver {
    async fn reserve_ports(&self, count: usize) -> TransportResult<Vec<u16>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        for attempt in 1..=self.max_attempts {
            if let Some(ports) = self.try_run(count).await? {
                debug!(ports = ?ports, attempt = attempt, "Reserved local ports");
                return Ok(ports);
            }
        }

        Err(TransportError::PortReservation(format!(
            "No run of {} free ports on {} after {} attempts",
            count, self.bind_ip, self.max_attempts
        )))
    }
}
