//! Network transport for SAP announcements and RTP streams.
//!
//! Both SAP and the announced RTP streams arrive as multicast UDP:
//!
//! - **SAP** listens on port 9875 across several groups at once (the IPv4
//!   group and one IPv6 group per scope), all on a single socket.
//!
//! - **RTP** monitors open one socket per announced channel, joined to that
//!   channel's group only.
//!
//! Receive loops read through the [`DatagramSource`] trait so that they can
//! be driven by an in-memory source in tests.

pub mod udp;

pub use udp::{Datagram, DatagramSource, MulticastInterface, MulticastSocket, SAP_PORT};
