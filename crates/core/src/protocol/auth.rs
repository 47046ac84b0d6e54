use std::fmt;

use base64::prelude::{BASE64_STANDARD, Engine as _};

use crate::error::{Result, SapError};

/// The only authentication sub-header version this codec understands.
pub const AUTH_VERSION: u8 = 1;

/// Authentication scheme carried in the low nibble of the sub-header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// PGP signature (RFC 2974 §7).
    Pgp,
    /// Cryptographic Message Syntax signature (RFC 2974 §7).
    Cms,
    /// Any other 4-bit code, kept verbatim.
    Other(u8),
}

impl AuthMethod {
    pub fn from_code(code: u8) -> Self {
        match code & 0x0f {
            0 => Self::Pgp,
            1 => Self::Cms,
            other => Self::Other(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Pgp => 0,
            Self::Cms => 1,
            Self::Other(code) => code & 0x0f,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pgp => write!(f, "pgp"),
            Self::Cms => write!(f, "cms"),
            Self::Other(code) => write!(f, "method-{code}"),
        }
    }
}

/// SAP authentication sub-header (RFC 2974 §4).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | V=1 |P| Auth  |                                               |
/// +-+-+-+-+-+-+-+-+                                               |
/// |              Format  specific authentication subheader        |
/// :                  ..................                           :
/// |                                               |  padding len  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The sub-header always occupies a whole number of 32-bit words. When the
/// data does not end on a word boundary the padding flag is set and the
/// last byte holds the padding length, that byte included.
///
/// The signature is decoded structurally only; it is never verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthData {
    pub version: u8,
    pub padding: bool,
    pub method: AuthMethod,
    /// Padding bytes including the trailing length byte.
    pub padding_len: u8,
    pub data: Vec<u8>,
}

impl AuthData {
    /// Version-1 sub-header with no padding yet; [`reflow_padding`](Self::reflow_padding)
    /// computes it.
    pub fn new(method: AuthMethod, data: Vec<u8>) -> Self {
        Self {
            version: AUTH_VERSION,
            padding: false,
            method,
            padding_len: 0,
            data,
        }
    }

    /// Parse a sub-header occupying exactly `block`.
    pub fn decode(block: &[u8]) -> Result<Self> {
        let first = *block.first().ok_or(SapError::TooShort {
            needed: 1,
            available: 0,
        })?;

        let version = (first & 0xe0) >> 5;
        if version != AUTH_VERSION {
            return Err(SapError::UnsupportedAuthVersion(version));
        }
        let padding = first & 0x10 != 0;
        let method = AuthMethod::from_code(first & 0x0f);

        let mut padding_len = 0u8;
        if padding {
            padding_len = block[block.len() - 1];
            if padding_len as usize > block.len() - 1 {
                return Err(SapError::InvalidPadding {
                    padding: padding_len as usize,
                    available: block.len() - 1,
                });
            }
        }

        let data = block[1..block.len() - padding_len as usize].to_vec();

        tracing::trace!(%method, padding_len, data_len = data.len(), "auth sub-header decoded");

        Ok(Self {
            version,
            padding,
            method,
            padding_len,
            data,
        })
    }

    /// Recompute the padding so the sub-header fills whole words, and return
    /// the length in 32-bit words.
    ///
    /// This is the only place the auth length is derived; caller-supplied
    /// padding is overwritten. Word-aligned data gets no padding at all.
    pub fn reflow_padding(&mut self) -> Result<u8> {
        let raw = self.data.len() + 1;
        let rem = raw % 4;
        if rem != 0 {
            self.padding = true;
            self.padding_len = (4 - rem) as u8;
        } else {
            self.padding = false;
            self.padding_len = 0;
        }

        let words = (raw + self.padding_len as usize) / 4;
        u8::try_from(words).map_err(|_| SapError::AuthDataTooLarge(self.data.len()))
    }

    /// Encoded size in bytes with the current padding.
    pub fn encoded_len(&self) -> usize {
        let padding = if self.padding {
            self.padding_len as usize
        } else {
            0
        };
        1 + self.data.len() + padding
    }

    /// Serialize into the start of `block`. Call
    /// [`reflow_padding`](Self::reflow_padding) first.
    pub fn encode(&self, block: &mut [u8]) -> Result<usize> {
        let len = self.encoded_len();
        if block.len() < len {
            return Err(SapError::BufferTooSmall {
                needed: len,
                available: block.len(),
            });
        }

        block[0] = (self.version << 5) | ((self.padding as u8) << 4) | self.method.code();
        let data_end = 1 + self.data.len();
        block[1..data_end].copy_from_slice(&self.data);
        if self.padding && self.padding_len > 0 {
            block[data_end..len - 1].fill(0);
            block[len - 1] = self.padding_len;
        }
        Ok(len)
    }
}

impl fmt::Display for AuthData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, BASE64_STANDARD.encode(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(len: usize) -> AuthData {
        AuthData::new(AuthMethod::Pgp, (1..=len as u8).collect())
    }

    #[test]
    fn reflow_word_count_bounds() {
        for len in 0..64 {
            let mut a = auth(len);
            let words = a.reflow_padding().unwrap() as usize;
            assert!(4 * words >= len + 1, "len {len}");
            assert!(4 * words - (len + 1) < 4, "len {len}");
            assert_eq!(a.encoded_len(), 4 * words, "len {len}");
        }
    }

    #[test]
    fn reflow_aligned_needs_no_padding() {
        let mut a = auth(3);
        a.padding = true;
        a.padding_len = 7;
        assert_eq!(a.reflow_padding().unwrap(), 1);
        assert!(!a.padding);
        assert_eq!(a.padding_len, 0);
    }

    #[test]
    fn reflow_forces_padding() {
        let mut a = auth(4);
        assert_eq!(a.reflow_padding().unwrap(), 2);
        assert!(a.padding);
        assert_eq!(a.padding_len, 3);

        let mut a = auth(2);
        assert_eq!(a.reflow_padding().unwrap(), 1);
        assert_eq!(a.padding_len, 1);
    }

    #[test]
    fn reflow_rejects_oversized_data() {
        let mut a = AuthData::new(AuthMethod::Cms, vec![0; 1024]);
        assert!(matches!(
            a.reflow_padding(),
            Err(SapError::AuthDataTooLarge(1024))
        ));
    }

    #[test]
    fn encode_layout() {
        let mut a = AuthData::new(AuthMethod::Cms, vec![0xaa, 0xbb, 0xcc, 0xdd]);
        a.reflow_padding().unwrap();
        let mut block = [0xffu8; 8];
        assert_eq!(a.encode(&mut block).unwrap(), 8);
        assert_eq!(block, [0x31, 0xaa, 0xbb, 0xcc, 0xdd, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn decode_padded_block() {
        let block = [0x31, 0xaa, 0xbb, 0xcc, 0xdd, 0x00, 0x00, 0x03];
        let a = AuthData::decode(&block).unwrap();
        assert_eq!(a.version, 1);
        assert!(a.padding);
        assert_eq!(a.method, AuthMethod::Cms);
        assert_eq!(a.padding_len, 3);
        assert_eq!(a.data, vec![0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn decode_unpadded_block() {
        let block = [0x20, 1, 2, 3];
        let a = AuthData::decode(&block).unwrap();
        assert!(!a.padding);
        assert_eq!(a.method, AuthMethod::Pgp);
        assert_eq!(a.data, vec![1, 2, 3]);
    }

    #[test]
    fn decode_rejects_version() {
        let block = [0x40, 0, 0, 0];
        assert!(matches!(
            AuthData::decode(&block),
            Err(SapError::UnsupportedAuthVersion(2))
        ));
    }

    #[test]
    fn decode_rejects_padding_overrun() {
        let block = [0x30, 0, 0, 9];
        assert!(matches!(
            AuthData::decode(&block),
            Err(SapError::InvalidPadding {
                padding: 9,
                available: 3
            })
        ));
    }

    #[test]
    fn decode_reencode_is_stable() {
        let mut a = AuthData::new(AuthMethod::Other(7), b"signature".to_vec());
        let words = a.reflow_padding().unwrap() as usize;
        let mut block = vec![0u8; words * 4];
        a.encode(&mut block).unwrap();
        let decoded = AuthData::decode(&block).unwrap();
        assert_eq!(decoded, a);
    }

    #[test]
    fn display_uses_base64() {
        let a = AuthData::new(AuthMethod::Pgp, b"sig".to_vec());
        assert_eq!(a.to_string(), "pgp c2ln");
    }
}
