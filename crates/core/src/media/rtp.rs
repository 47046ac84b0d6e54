use crate::error::{Result, RtpErrorKind, SapError};

/// Size of the RTP fixed header.
pub const FIXED_HEADER_LEN: usize = 12;

/// RTP fixed header (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |                  CSRC list (CC entries)                       |
/// ```
///
/// Loss monitoring only looks at the sequence number, but the whole
/// header is validated so that stray non-RTP traffic on the group is
/// rejected instead of producing bogus loss reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    pub padding: bool,
    pub extension: bool,
    pub marker: bool,
    /// RTP payload type (7-bit, RFC 3551).
    pub pt: u8,
    /// 16-bit, wrapping.
    pub sequence: u16,
    pub timestamp: u32,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    pub csrcs: Vec<u32>,
}

impl RtpHeader {
    pub fn new(pt: u8, ssrc: u32, sequence: u16) -> Self {
        Self {
            padding: false,
            extension: false,
            marker: false,
            pt,
            sequence,
            timestamp: 0,
            ssrc,
            csrcs: Vec::new(),
        }
    }

    /// Parse and validate the header at the start of a datagram.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let malformed = |kind| SapError::MalformedRtpPacket { kind };

        if buf.len() < FIXED_HEADER_LEN {
            return Err(malformed(RtpErrorKind::Truncated));
        }
        let version = buf[0] >> 6;
        if version != 2 {
            return Err(malformed(RtpErrorKind::BadVersion(version)));
        }
        let padding = buf[0] & 0x20 != 0;
        let extension = buf[0] & 0x10 != 0;
        let csrc_count = (buf[0] & 0x0f) as usize;

        let mut len = FIXED_HEADER_LEN + 4 * csrc_count;
        if buf.len() < len {
            return Err(malformed(RtpErrorKind::BadLength));
        }
        let csrcs = buf[FIXED_HEADER_LEN..len]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        if extension {
            if buf.len() < len + 4 {
                return Err(malformed(RtpErrorKind::BadLength));
            }
            let words = u16::from_be_bytes([buf[len + 2], buf[len + 3]]) as usize;
            len += 4 + 4 * words;
            if buf.len() < len {
                return Err(malformed(RtpErrorKind::BadLength));
            }
        }

        if padding {
            let pad = buf[buf.len() - 1] as usize;
            if pad == 0 || len + pad > buf.len() {
                return Err(malformed(RtpErrorKind::BadLength));
            }
        }

        Ok(Self {
            padding,
            extension,
            marker: buf[1] & 0x80 != 0,
            pt: buf[1] & 0x7f,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            csrcs,
        })
    }

    /// Serialize the fixed header and CSRC list.
    ///
    /// Padding and extension bits are written as set; the caller appends the
    /// matching trailer or extension block.
    pub fn write(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FIXED_HEADER_LEN + 4 * self.csrcs.len());
        out.push(
            (2 << 6)
                | ((self.padding as u8) << 5)
                | ((self.extension as u8) << 4)
                | (self.csrcs.len() as u8 & 0x0f),
        );
        out.push(((self.marker as u8) << 7) | (self.pt & 0x7f));
        out.extend_from_slice(&self.sequence.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        for csrc in &self.csrcs {
            out.extend_from_slice(&csrc.to_be_bytes());
        }
        out
    }
}
