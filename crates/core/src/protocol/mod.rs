//! SAP wire format (RFC 2974).
//!
//! SAP announcements are small multicast datagrams: a binary header that
//! identifies the announcer, followed by a MIME payload, almost always an
//! SDP session description.
//!
//! ```text
//! byte 0      V(3) A R T E C
//! byte 1      auth length, in 32-bit words
//! bytes 2-3   message identifier hash
//! bytes 4..   originating source (4 bytes if A=0, 16 if A=1)
//! [auth]      authentication sub-header, auth length * 4 bytes
//! [type]      NUL-terminated payload type; absent in version 0 and when
//!             the payload directly starts with "v=0"
//! ...         payload
//! ```
//!
//! | Module | Content |
//! |--------|---------|
//! | [`header`] | Header codec |
//! | [`auth`] | Authentication sub-header codec and padding |
//! | [`packet`] | Header + payload, promotion to a session description |
//! | [`sdp`] | Session description parsing and serialization |

pub mod auth;
pub mod header;
pub mod packet;
pub mod sdp;

pub use auth::{AuthData, AuthMethod};
pub use header::{AddressType, Header, MessageType, SDP_PAYLOAD_TYPE};
pub use packet::{Packet, SessionPacket};
pub use sdp::SessionDescription;
