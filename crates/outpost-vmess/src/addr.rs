//! Destination encoding carried in the request header.
//!
//! Wire layout after the port: `atyp(1) ‖ addr`, where `addr` is 4 bytes for
//! IPv4, 16 bytes for IPv6, or one length byte followed by the host bytes.

use crate::VmessError;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// VMess address type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddrType {
    Ipv4 = 1,
    Domain = 2,
    Ipv6 = 3,
}

impl AddrType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Ipv4),
            2 => Some(Self::Domain),
            3 => Some(Self::Ipv6),
            _ => None,
        }
    }
}

/// A host name of 1..=255 bytes, so its length always fits the prefix byte.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainName(String);

impl DomainName {
    pub const MAX_LEN: usize = u8::MAX as usize;

    pub fn new(host: impl Into<String>) -> Result<Self, VmessError> {
        let host = host.into();
        match host.len() {
            0 => Err(VmessError::InvalidAddress("empty domain name".into())),
            n if n > Self::MAX_LEN => Err(VmessError::InvalidAddress(format!(
                "domain name of {n} bytes exceeds {} bytes",
                Self::MAX_LEN
            ))),
            _ => Ok(Self(host)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DstAddr {
    Ipv4([u8; 4]),
    Ipv6([u8; 16]),
    Domain(DomainName),
}

impl DstAddr {
    pub fn addr_type(&self) -> AddrType {
        match self {
            Self::Ipv4(_) => AddrType::Ipv4,
            Self::Ipv6(_) => AddrType::Ipv6,
            Self::Domain(_) => AddrType::Domain,
        }
    }

    /// Address bytes as they appear on the wire, without the type tag.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Ipv4(octets) => octets.to_vec(),
            Self::Ipv6(octets) => octets.to_vec(),
            Self::Domain(name) => {
                let host = name.as_str().as_bytes();
                let mut out = Vec::with_capacity(1 + host.len());
                // DomainName guarantees len <= 255.
                out.push(host.len() as u8);
                out.extend_from_slice(host);
                out
            }
        }
    }
}

impl From<Ipv4Addr> for DstAddr {
    fn from(ip: Ipv4Addr) -> Self {
        Self::Ipv4(ip.octets())
    }
}

impl From<Ipv6Addr> for DstAddr {
    fn from(ip: Ipv6Addr) -> Self {
        Self::Ipv6(ip.octets())
    }
}

impl fmt::Display for DstAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4(o) => write!(f, "{}", Ipv4Addr::from(*o)),
            Self::Ipv6(o) => write!(f, "[{}]", Ipv6Addr::from(*o)),
            Self::Domain(d) => f.write_str(d.as_str()),
        }
    }
}

/// Where the server should connect on the client's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub addr: DstAddr,
    pub port: u16,
}

impl Destination {
    pub fn new(addr: DstAddr, port: u16) -> Self {
        Self { addr, port }
    }

    pub fn addr_type(&self) -> AddrType {
        self.addr.addr_type()
    }

    /// Append `atyp ‖ addr` to `buf`.
    pub fn write_addr(&self, buf: &mut Vec<u8>) {
        buf.push(self.addr_type() as u8);
        buf.extend_from_slice(&self.addr.to_bytes());
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}
