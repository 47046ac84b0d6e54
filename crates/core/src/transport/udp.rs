use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::Result;

/// Well-known SAP port (RFC 2974 §3).
pub const SAP_PORT: u16 = 9875;

/// SAP group for global-scope IPv4 announcements.
pub const SAP_GROUP_V4: Ipv4Addr = Ipv4Addr::new(224, 2, 127, 254);

/// `ff0X::2:7ffe`; the second byte is replaced by the scope.
const SAP_GROUP_V6_BASE: Ipv6Addr = Ipv6Addr::new(0xff08, 0, 0, 0, 0, 0, 2, 0x7ffe);

/// IPv6 multicast scopes (RFC 4291 §2.7) with a SAP group.
pub const SCOPE_LINK: u8 = 0x2;
pub const SCOPE_SITE: u8 = 0x5;
pub const SCOPE_ORGANIZATION: u8 = 0x8;
pub const SCOPE_GLOBAL: u8 = 0xe;

/// The SAP group of an IPv6 scope.
///
/// ```
/// use sap::transport::udp::{sap_group_v6, SCOPE_SITE};
///
/// assert_eq!(sap_group_v6(SCOPE_SITE), "ff05::2:7ffe".parse::<std::net::Ipv6Addr>().unwrap());
/// ```
pub fn sap_group_v6(zone: u8) -> Ipv6Addr {
    let mut octets = SAP_GROUP_V6_BASE.octets();
    octets[1] = zone;
    Ipv6Addr::from(octets)
}

/// SAP groups of the link, site, organization and global IPv6 scopes.
pub fn ipv6_sap_groups() -> Vec<IpAddr> {
    [SCOPE_LINK, SCOPE_SITE, SCOPE_ORGANIZATION, SCOPE_GLOBAL]
        .into_iter()
        .map(|zone| IpAddr::V6(sap_group_v6(zone)))
        .collect()
}

/// Every IPv6 scope group plus the IPv4 group.
pub fn default_sap_groups() -> Vec<IpAddr> {
    let mut groups = ipv6_sap_groups();
    groups.push(IpAddr::V4(SAP_GROUP_V4));
    groups
}

/// Interface used for group membership. The defaults let the OS choose,
/// which is often not the interface carrying the multicast traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MulticastInterface {
    /// Local address of the interface for IPv4 joins.
    pub ipv4: Ipv4Addr,
    /// Interface index for IPv6 joins.
    pub ipv6_index: u32,
}

impl Default for MulticastInterface {
    fn default() -> Self {
        Self {
            ipv4: Ipv4Addr::UNSPECIFIED,
            ipv6_index: 0,
        }
    }
}

/// One received datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datagram {
    pub len: usize,
    pub source: SocketAddr,
    /// Destination address, when the source can tell.
    pub destination: Option<IpAddr>,
}

/// Byte source for the receive loops.
///
/// Implemented by sockets; tests substitute in-memory sources.
pub trait DatagramSource: Send {
    /// Block until a datagram is copied into `buf`.
    ///
    /// A read timeout surfaces as `WouldBlock` or `TimedOut`.
    fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<Datagram>;

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

impl DatagramSource for UdpSocket {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<Datagram> {
        let (len, source) = self.recv_from(buf)?;
        let local = self.local_addr()?.ip();
        Ok(Datagram {
            len,
            source,
            destination: (!local.is_unspecified()).then_some(local),
        })
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        UdpSocket::set_read_timeout(self, timeout)
    }
}

/// UDP socket subscribed to one or more multicast groups.
///
/// Multicast delivery is group-scoped: a socket bound to the wildcard
/// address receives traffic for every group any socket on the host joined
/// on that port. A socket joined to a single group is therefore bound to
/// the group address itself on Unix, which makes the kernel filter on
/// destination; the group is then reported as the datagram destination.
pub struct MulticastSocket {
    socket: UdpSocket,
    destination: Option<IpAddr>,
}

impl MulticastSocket {
    /// Bind `port` and join every group in `groups`.
    ///
    /// IPv6 membership is tried first for every group; IPv4 and
    /// IPv4-mapped groups fall back to an IPv4 join when the IPv6 path
    /// rejects them.
    pub fn join(groups: &[IpAddr], port: u16, interface: MulticastInterface) -> Result<Self> {
        if groups.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "no multicast group").into());
        }

        let ipv6 = groups.iter().any(IpAddr::is_ipv6);
        let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if ipv6 {
            socket.set_only_v6(false)?;
        }

        let single = match groups {
            [group] if cfg!(unix) => Some(*group),
            _ => None,
        };
        let bind_ip = match single {
            Some(group) => group,
            None if ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        socket.bind(&SocketAddr::new(bind_ip, port).into())?;

        for group in groups {
            join_group(&socket, *group, ipv6, interface)?;
            tracing::debug!(%group, port, "joined multicast group");
        }

        Ok(Self {
            socket: socket.into(),
            destination: single,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramSource for MulticastSocket {
    fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<Datagram> {
        let (len, source) = self.socket.recv_from(buf)?;
        Ok(Datagram {
            len,
            source,
            destination: self.destination,
        })
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }
}

fn join_group(
    socket: &Socket,
    group: IpAddr,
    ipv6_socket: bool,
    interface: MulticastInterface,
) -> io::Result<()> {
    let (v6, v4) = match group {
        IpAddr::V6(g) => (Some(g), g.to_ipv4_mapped()),
        IpAddr::V4(g) if ipv6_socket => (Some(g.to_ipv6_mapped()), Some(g)),
        IpAddr::V4(g) => (None, Some(g)),
    };

    if let Some(g) = v6 {
        match socket.join_multicast_v6(&g, interface.ipv6_index) {
            Ok(()) => return Ok(()),
            Err(e) if v4.is_none() => return Err(e),
            Err(e) => {
                tracing::trace!(group = %g, error = %e, "IPv6 join rejected, retrying as IPv4");
            }
        }
    }

    match v4 {
        Some(g) => socket.join_multicast_v4(&g, &interface.ipv4),
        None => Ok(()),
    }
}
