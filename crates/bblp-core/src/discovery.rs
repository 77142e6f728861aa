//! One-shot printer discovery.
//!
//! Printers announce themselves with an SSDP-style `NOTIFY *` datagram on UDP
//! port 2021. One datagram is read and its headers returned.

use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::protocol::constants::{
    DISCOVERY_MAX_DATAGRAM, DISCOVERY_PORT, HEADER_DEVICE_NAME, HEADER_LOCATION, HEADER_USN,
    NOTIFY_PREAMBLE,
};

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Unable to discover: cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Unable to discover: no announcement within {0:?}")]
    Timeout(Duration),

    #[error("Unable to discover: {0}")]
    Io(#[from] io::Error),
}

impl DiscoveryError {
    /// Advice for the user, when there is any.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            DiscoveryError::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse => {
                Some("Another program (e.g. the slicer) is listening on the discovery port; close it or pass --host")
            }
            _ => None,
        }
    }
}

/// Headers of a discovery announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Announcement {
    pub headers: BTreeMap<String, String>,
}

impl Announcement {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Network address of the printer.
    pub fn location(&self) -> Option<&str> {
        self.get(HEADER_LOCATION)
    }

    /// Device ID.
    pub fn usn(&self) -> Option<&str> {
        self.get(HEADER_USN)
    }

    pub fn device_name(&self) -> Option<&str> {
        self.get(HEADER_DEVICE_NAME)
    }
}

/// Parse a `NOTIFY *` datagram into its headers.
///
/// Returns `None` when the datagram does not start with the preamble.
pub fn parse_notify(datagram: &[u8]) -> Option<Announcement> {
    if !datagram.starts_with(NOTIFY_PREAMBLE) {
        return None;
    }

    let text = String::from_utf8_lossy(datagram);
    let headers = text
        .split("\r\n")
        .filter(|line| !line.is_empty())
        .filter_map(|line| line.split_once(' '))
        .map(|(name, value)| {
            let name = name.strip_suffix(':').unwrap_or(name);
            (name.to_string(), value.to_string())
        })
        .collect();

    Some(Announcement { headers })
}

/// Wait for one announcement on `listen`.
#[instrument(level = "debug")]
pub fn discover(listen: IpAddr, timeout: Duration) -> Result<Option<Announcement>, DiscoveryError> {
    let addr = SocketAddr::new(listen, DISCOVERY_PORT);
    let socket = bind(addr).map_err(|source| DiscoveryError::Bind { addr, source })?;
    listen_once(&socket, timeout)
}

/// Read one datagram from an already bound socket.
pub fn listen_once(
    socket: &UdpSocket,
    timeout: Duration,
) -> Result<Option<Announcement>, DiscoveryError> {
    socket.set_read_timeout(Some(timeout))?;

    let mut buf = [0u8; DISCOVERY_MAX_DATAGRAM];
    let (n, from) = match socket.recv_from(&mut buf) {
        Ok(r) => r,
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
            return Err(DiscoveryError::Timeout(timeout));
        }
        Err(e) => return Err(e.into()),
    };

    let announcement = parse_notify(&buf[..n]);
    match &announcement {
        Some(a) => debug!(from = %from, headers = ?a.headers, "Found printer"),
        None => debug!(from = %from, len = n, "Ignoring datagram without NOTIFY preamble"),
    }
    Ok(announcement)
}

fn bind(addr: SocketAddr) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}
