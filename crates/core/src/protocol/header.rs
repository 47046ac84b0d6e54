use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use rand::RngExt;

use crate::error::{Result, SapError};
use crate::protocol::auth::AuthData;

/// Default and only documented SAP payload type.
pub const SDP_PAYLOAD_TYPE: &str = "application/sdp";

/// Start of every SDP document. A version-1 packet whose payload type field
/// starts with these bytes carries an implicit `application/sdp` type.
pub const SDP_MAGIC: &[u8; 3] = b"v=0";

/// Current SAP version (RFC 2974).
pub const SAP_VERSION: u8 = 1;

const FIXED_LEN: usize = 4;

/// Value of the T bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Announce,
    Delete,
}

/// Value of the A bit, selecting the size of the originating source field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4,
    Ipv6,
}

/// SAP packet header (RFC 2974 §3).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | V=1 |A|R|T|E|C|   auth len    |         msg id hash           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :                originating source (32 or 128 bits)            :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                    optional authentication data               |
/// :                              ....                             :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                      optional payload type                    |
/// +                                         +-+- - - - - - - - - -+
/// |                                         |0|                   |
/// + - - - - - - - - - - - - - - - - - - - - +-+                   |
/// :                            payload                            :
/// ```
///
/// The address-type flag, the auth length and the header length are not
/// stored: they are derived from `origin` and `auth` every time the header
/// is measured or written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// 0 or 1.
    pub version: u8,
    /// R bit. Senders must clear it; receivers keep whatever arrived.
    pub reserved: bool,
    pub message_type: MessageType,
    pub encrypted: bool,
    pub compressed: bool,
    pub msg_id_hash: u16,
    /// Originating source. An `Ipv4` value is written as 4 bytes with A=0,
    /// an `Ipv6` value as 16 bytes with A=1.
    pub origin: IpAddr,
    pub auth: Option<AuthData>,
    pub payload_type: String,
}

impl Header {
    /// A version-1 announcement header with a random message identifier hash.
    pub fn announcement(origin: IpAddr) -> Self {
        Self {
            version: SAP_VERSION,
            reserved: false,
            message_type: MessageType::Announce,
            encrypted: false,
            compressed: false,
            msg_id_hash: rand::rng().random::<u16>(),
            origin,
            auth: None,
            payload_type: SDP_PAYLOAD_TYPE.to_string(),
        }
    }

    pub fn address_type(&self) -> AddressType {
        match self.origin {
            IpAddr::V4(_) => AddressType::Ipv4,
            IpAddr::V6(_) => AddressType::Ipv6,
        }
    }

    /// Whether the payload should be handed to the SDP parser.
    pub fn is_session_description(&self) -> bool {
        self.payload_type == SDP_PAYLOAD_TYPE
    }

    /// Auth section length in 32-bit words, as [`AuthData::reflow_padding`]
    /// will compute it.
    pub fn auth_words(&self) -> usize {
        self.auth
            .as_ref()
            .map_or(0, |auth| (auth.data.len() + 1).div_ceil(4))
    }

    /// Header length in bytes as [`encode`](Self::encode) would write it.
    pub fn encoded_len(&self) -> usize {
        let address = match self.address_type() {
            AddressType::Ipv4 => 4,
            AddressType::Ipv6 => 16,
        };
        let payload_type = if self.version != 0 {
            self.payload_type.len() + 1
        } else {
            0
        };
        FIXED_LEN + address + self.auth_words() * 4 + payload_type
    }

    /// Parse a header from the start of `buf`.
    ///
    /// Returns the header and the number of bytes it occupies; the payload
    /// starts right after.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        require(buf, 0, FIXED_LEN)?;

        let first = buf[0];
        let version = (first & 0xe0) >> 5;
        if version > SAP_VERSION {
            return Err(SapError::UnsupportedVersion(version));
        }
        let ipv6 = first & 0x10 != 0;
        let reserved = first & 0x08 != 0;
        let message_type = if first & 0x04 != 0 {
            MessageType::Delete
        } else {
            MessageType::Announce
        };
        let encrypted = first & 0x02 != 0;
        let compressed = first & 0x01 != 0;
        let auth_len = buf[1] as usize;
        let msg_id_hash = u16::from_be_bytes([buf[2], buf[3]]);
        let mut offset = FIXED_LEN;

        let origin = if ipv6 {
            require(buf, offset, 16)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[offset..offset + 16]);
            offset += 16;
            IpAddr::V6(Ipv6Addr::from(octets))
        } else {
            require(buf, offset, 4)?;
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[offset..offset + 4]);
            offset += 4;
            IpAddr::V4(Ipv4Addr::from(octets))
        };

        let mut auth = None;
        if auth_len > 0 {
            let block_len = auth_len * 4;
            require(buf, offset, block_len)?;
            auth = Some(AuthData::decode(&buf[offset..offset + block_len])?);
            offset += block_len;
        }

        let payload_type = if version != 0 {
            let rest = &buf[offset..];
            if rest.is_empty() {
                return Err(SapError::TooShort {
                    needed: offset + 1,
                    available: buf.len(),
                });
            }
            if rest.starts_with(SDP_MAGIC) {
                SDP_PAYLOAD_TYPE.to_string()
            } else {
                let end = rest
                    .iter()
                    .position(|&b| b == 0)
                    .ok_or(SapError::MalformedPayloadType)?;
                let payload_type = std::str::from_utf8(&rest[..end])
                    .map_err(|_| SapError::MalformedPayloadType)?;
                offset += end + 1;
                payload_type.to_string()
            }
        } else {
            SDP_PAYLOAD_TYPE.to_string()
        };

        tracing::trace!(
            version,
            msg_id_hash = format_args!("{:#06x}", msg_id_hash),
            %origin,
            payload_type = %payload_type,
            len = offset,
            "SAP header decoded"
        );

        Ok((
            Self {
                version,
                reserved,
                message_type,
                encrypted,
                compressed,
                msg_id_hash,
                origin,
                auth,
                payload_type,
            },
            offset,
        ))
    }

    /// Serialize the header followed by `payload` into `buf`.
    ///
    /// Padding, auth length and header length are recomputed first, so the
    /// auth sub-header may be updated in place. Returns the bytes written.
    pub fn encode(&mut self, payload: &[u8], buf: &mut [u8]) -> Result<usize> {
        if self.version > SAP_VERSION {
            return Err(SapError::UnsupportedVersion(self.version));
        }
        let auth_len = match self.auth.as_mut() {
            Some(auth) => auth.reflow_padding()?,
            None => 0,
        };

        let total = self.encoded_len() + payload.len();
        if buf.len() < total {
            return Err(SapError::BufferTooSmall {
                needed: total,
                available: buf.len(),
            });
        }

        let ipv6 = self.address_type() == AddressType::Ipv6;
        buf[0] = (self.version << 5)
            | ((ipv6 as u8) << 4)
            | ((self.reserved as u8) << 3)
            | (((self.message_type == MessageType::Delete) as u8) << 2)
            | ((self.encrypted as u8) << 1)
            | (self.compressed as u8);
        buf[1] = auth_len;
        buf[2..4].copy_from_slice(&self.msg_id_hash.to_be_bytes());

        let mut offset = FIXED_LEN;
        match self.origin {
            IpAddr::V4(addr) => {
                buf[offset..offset + 4].copy_from_slice(&addr.octets());
                offset += 4;
            }
            IpAddr::V6(addr) => {
                buf[offset..offset + 16].copy_from_slice(&addr.octets());
                offset += 16;
            }
        }

        if let Some(auth) = &self.auth {
            offset += auth.encode(&mut buf[offset..])?;
        }

        if self.version != 0 {
            let payload_type = self.payload_type.as_bytes();
            buf[offset..offset + payload_type.len()].copy_from_slice(payload_type);
            offset += payload_type.len();
            buf[offset] = 0;
            offset += 1;
        }

        buf[offset..offset + payload.len()].copy_from_slice(payload);
        Ok(offset + payload.len())
    }
}

fn require(buf: &[u8], offset: usize, n: usize) -> Result<()> {
    if buf.len() < offset + n {
        return Err(SapError::TooShort {
            needed: offset + n,
            available: buf.len(),
        });
    }
    Ok(())
}
