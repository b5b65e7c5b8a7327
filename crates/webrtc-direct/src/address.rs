//! Address handling
//!
//! Dialable addresses look like `/ip4/<addr>/tcp/<port>/http/p2p-webrtc-direct`.
//! The part before `/p2p-webrtc-direct` names the HTTP signaling endpoint.

use multiaddr::{Multiaddr, Protocol};
use std::borrow::Borrow;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::error::TransportError;

/// HTTP endpoint that carries the signaling exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalingTarget {
    pub host: IpAddr,
    pub port: u16,
}

impl SignalingTarget {
    /// Resolve the signaling endpoint of a WebRTC-direct address
    pub fn from_multiaddr(addr: &Multiaddr) -> Result<Self, TransportError> {
        let bare = decapsulate_webrtc_direct(addr);
        let mut protocols = bare.iter();

        let host = match protocols.next() {
            Some(Protocol::Ip4(ip)) => IpAddr::V4(ip),
            Some(Protocol::Ip6(ip)) => IpAddr::V6(ip),
            _ => {
                return Err(TransportError::InvalidAddress(format!(
                    "{} does not start with an IP address",
                    addr
                )))
            }
        };
        let port = match protocols.next() {
            Some(Protocol::Tcp(port)) => port,
            _ => {
                return Err(TransportError::InvalidAddress(format!(
                    "{} has no TCP port",
                    addr
                )))
            }
        };

        Ok(Self { host, port })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Base URL of the signaling endpoint
    pub fn url(&self) -> String {
        format!("http://{}/", self)
    }
}

impl fmt::Display for SignalingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SocketAddr brackets IPv6 hosts
        write!(f, "{}", self.socket_addr())
    }
}

/// Strip the last `/p2p-webrtc-direct` segment and everything after it
pub fn decapsulate_webrtc_direct(addr: &Multiaddr) -> Multiaddr {
    let protocols: Vec<Protocol<'_>> = addr.iter().collect();
    match protocols
        .iter()
        .rposition(|p| matches!(p, Protocol::P2pWebRtcDirect))
    {
        Some(idx) => protocols.into_iter().take(idx).collect(),
        None => addr.clone(),
    }
}

/// Replace a wildcard TCP port with the port actually bound
pub(crate) fn with_bound_port(addr: &Multiaddr, port: u16) -> Multiaddr {
    addr.iter()
        .map(|p| match p {
            Protocol::Tcp(0) => Protocol::Tcp(port),
            other => other,
        })
        .collect()
}

/// Observed address of a remote HTTP client, `/ip4|ip6/<ip>/tcp/<port>`
pub fn from_socket_addr(addr: SocketAddr) -> Multiaddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) => Protocol::Ip4(ip),
        IpAddr::V6(ip) => Protocol::Ip6(ip),
    };
    Multiaddr::empty().with(ip).with(Protocol::Tcp(addr.port()))
}

/// Whether the address is exactly `/ip4|ip6/_/tcp/_/http/p2p-webrtc-direct`
/// once peer-id segments are dropped
pub fn is_webrtc_direct(addr: &Multiaddr) -> bool {
    let protocols: Vec<Protocol<'_>> = addr
        .iter()
        .filter(|p| !matches!(p, Protocol::P2p(_)))
        .collect();

    matches!(
        protocols.as_slice(),
        [
            Protocol::Ip4(_) | Protocol::Ip6(_),
            Protocol::Tcp(_),
            Protocol::Http,
            Protocol::P2pWebRtcDirect,
        ]
    )
}

fn is_relayed(addr: &Multiaddr) -> bool {
    addr.iter().any(|p| matches!(p, Protocol::P2pCircuit))
}

/// Keep the addresses this transport can dial, in input order
///
/// A single address can be passed as `[addr]` or `Some(addr)`.
pub fn filter<I>(addrs: I) -> Vec<Multiaddr>
where
    I: IntoIterator,
    I::Item: Borrow<Multiaddr>,
{
    addrs
        .into_iter()
        .filter(|addr| {
            let addr = addr.borrow();
            !is_relayed(addr) && is_webrtc_direct(addr)
        })
        .map(|addr| addr.borrow().clone())
        .collect()
}
