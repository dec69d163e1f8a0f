use core::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// A MAC of up to six octets; zero length means "everyone".
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MacAddress {
    bytes: [u8; 6],
    len: u8,
}

impl MacAddress {
    pub const BROADCAST: Self = Self {
        bytes: [0; 6],
        len: 0,
    };

    /// Copies up to six octets of `mac`; returns `None` when it is longer.
    pub fn new(mac: &[u8]) -> Option<Self> {
        if mac.len() > 6 {
            return None;
        }
        let mut bytes = [0u8; 6];
        bytes[..mac.len()].copy_from_slice(mac);
        Some(Self {
            bytes,
            len: mac.len() as u8,
        })
    }

    /// Single-octet MAC, as used on MS/TP-like links and by [`MemoryNetwork`](crate::MemoryNetwork).
    pub const fn station(id: u8) -> Self {
        Self {
            bytes: [id, 0, 0, 0, 0, 0],
            len: 1,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub const fn is_broadcast(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({self})")
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_broadcast() {
            return f.write_str("*");
        }
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Where a frame comes from or goes to. Compared by value; used as the
/// correlation key for outstanding transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataLinkAddress {
    Ip(SocketAddr),
    Mac {
        network: Option<u16>,
        mac: MacAddress,
    },
}

impl DataLinkAddress {
    pub const BACNET_IP_DEFAULT_PORT: u16 = 47808;

    pub fn local_broadcast(port: u16) -> Self {
        Self::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), port))
    }

    pub fn bacnet_default(addr: IpAddr) -> Self {
        Self::Ip(SocketAddr::new(addr, Self::BACNET_IP_DEFAULT_PORT))
    }

    pub const fn station(id: u8) -> Self {
        Self::Mac {
            network: None,
            mac: MacAddress::station(id),
        }
    }

    pub fn as_socket_addr(self) -> Option<SocketAddr> {
        match self {
            Self::Ip(addr) => Some(addr),
            Self::Mac { .. } => None,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        match self {
            Self::Ip(addr) => matches!(addr.ip(), IpAddr::V4(v4) if v4.is_broadcast()),
            Self::Mac { mac, .. } => mac.is_broadcast(),
        }
    }
}

impl fmt::Display for DataLinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ip(addr) => write!(f, "{addr}"),
            Self::Mac {
                network: Some(net),
                mac,
            } => write!(f, "{net}/{mac}"),
            Self::Mac { network: None, mac } => write!(f, "{mac}"),
        }
    }
}
