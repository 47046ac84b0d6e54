use crate::error::{Result, SapError};
use crate::protocol::header::Header;
use crate::protocol::sdp::SessionDescription;

/// A SAP packet: decoded header plus the raw payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

/// A SAP packet whose payload was parsed as a session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPacket {
    pub header: Header,
    pub description: SessionDescription,
}

impl Packet {
    /// Decode a whole datagram.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (header, len) = Header::decode(buf)?;
        Ok(Self {
            header,
            payload: buf[len..].to_vec(),
        })
    }

    /// Size of the datagram [`encode`](Self::encode) produces.
    pub fn encoded_len(&self) -> usize {
        self.header.encoded_len() + self.payload.len()
    }

    pub fn encode(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.header.encode(&self.payload, buf)
    }

    /// Parse the payload as SDP.
    ///
    /// Fails with [`SapError::NotSessionDescription`] when the payload type
    /// is anything but `application/sdp`.
    pub fn into_session(self) -> Result<SessionPacket> {
        if !self.header.is_session_description() {
            return Err(SapError::NotSessionDescription(self.header.payload_type));
        }
        let description = SessionDescription::from_payload(&self.payload)?;
        Ok(SessionPacket {
            header: self.header,
            description,
        })
    }
}

impl SessionPacket {
    pub fn new(header: Header, description: SessionDescription) -> Self {
        Self {
            header,
            description,
        }
    }

    /// Encode the header followed by the serialized description.
    pub fn encode(&mut self, buf: &mut [u8]) -> Result<usize> {
        let payload = self.description.to_string();
        self.header.encode(payload.as_bytes(), buf)
    }

    pub fn encoded_len(&self) -> usize {
        self.header.encoded_len() + self.description.to_string().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    const SDP: &str = "v=0\r\no=- 42 1 IN IP4 10.1.1.1\r\ns=News\r\nc=IN IP4 239.1.1.1/32\r\nt=0 0\r\nm=audio 5004 RTP/AVP 96\r\n";

    fn packet(payload: &[u8]) -> Packet {
        Packet {
            header: Header::announcement(IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1))),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn encode_decode_keeps_payload() {
        let mut p = packet(SDP.as_bytes());
        let mut buf = vec![0u8; p.encoded_len()];
        let n = p.encode(&mut buf).unwrap();
        assert_eq!(n, buf.len());
        assert_eq!(Packet::decode(&buf).unwrap(), p);
    }

    #[test]
    fn promotes_sdp_payload() {
        let session = packet(SDP.as_bytes()).into_session().unwrap();
        assert_eq!(session.description.name, "News");
    }

    #[test]
    fn rejects_foreign_payload_type() {
        let mut p = packet(b"hello");
        p.header.payload_type = "text/plain".to_string();
        assert!(matches!(
            p.into_session(),
            Err(SapError::NotSessionDescription(t)) if t == "text/plain"
        ));
    }

    #[test]
    fn reports_sdp_failure() {
        assert!(matches!(
            packet(b"w=0\r\n").into_session(),
            Err(SapError::SessionDescriptionParseFailed { .. })
        ));
    }

    #[test]
    fn session_packet_encodes_description() {
        let description = SessionDescription::parse(SDP).unwrap();
        let header = Header::announcement(IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1)));
        let mut session = SessionPacket::new(header, description);
        let mut buf = vec![0u8; session.encoded_len()];
        session.encode(&mut buf).unwrap();

        let decoded = Packet::decode(&buf).unwrap().into_session().unwrap();
        assert_eq!(decoded, session);
    }
}
