//! SDP (Session Description Protocol) parsing and serialization (RFC 4566 / RFC 8866).
//!
//! SAP payloads of type `application/sdp` carry a description like:
//!
//! ```text
//! v=0                                          ← protocol version
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>  ← origin
//! s=<session-name>                              ← session name
//! c=IN IP4 <group>/<ttl>                        ← connection address
//! t=0 0                                         ← timing
//! a=tool:...                                    ← session attributes
//! m=video <port> RTP/AVP 33                     ← media description
//! a=rtpmap:33 MP2T/90000                        ← media attributes
//! ```
//!
//! Only the fields needed to identify and locate a stream are interpreted;
//! everything else is kept verbatim so that [`Display`](std::fmt::Display)
//! writes the description back in RFC field order. Descriptions are plain
//! values: `Clone` is a full deep copy.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::error::{Result, SapError, SdpErrorKind};

/// `o=` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub username: String,
    pub session_id: String,
    pub session_version: String,
    pub net_type: String,
    pub addr_type: String,
    pub address: String,
}

/// `c=` line. `address` keeps any `/ttl` or `/count` suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub net_type: String,
    pub addr_type: String,
    pub address: String,
}

impl Connection {
    /// The address without its `/ttl` suffix, if it is an IP literal.
    pub fn host(&self) -> Option<IpAddr> {
        self.address.split('/').next()?.parse().ok()
    }
}

/// `t=` line with its `r=` repeat lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub active: String,
    pub repeats: Vec<String>,
}

/// `m=` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub kind: String,
    pub port: u16,
    pub port_count: Option<u16>,
    pub protocol: String,
    pub formats: Vec<String>,
    pub information: Option<String>,
    pub connections: Vec<Connection>,
    pub bandwidths: Vec<String>,
    pub key: Option<String>,
    pub attributes: Vec<String>,
}

/// A parsed session description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub origin: Origin,
    pub name: String,
    pub information: Option<String>,
    pub uri: Option<String>,
    pub emails: Vec<String>,
    pub phones: Vec<String>,
    pub connection: Option<Connection>,
    pub bandwidths: Vec<String>,
    pub timings: Vec<Timing>,
    pub time_zones: Option<String>,
    pub key: Option<String>,
    pub attributes: Vec<String>,
    pub media: Vec<Media>,
}

impl SessionDescription {
    /// Parse a description from its text form.
    ///
    /// Both CRLF and bare LF line endings are accepted, trailing NULs and
    /// blank lines are ignored, and unknown line types are skipped as
    /// RFC 4566 §5 requires.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim_end_matches('\0');
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim_end_matches('\r')))
            .filter(|(_, l)| !l.is_empty());

        let (line_no, first) = lines.next().ok_or(fail(0, SdpErrorKind::Empty))?;
        let (kind, value) = split_line(line_no, first)?;
        if kind != 'v' {
            return Err(fail(line_no, SdpErrorKind::MissingVersion));
        }
        if value.trim() != "0" {
            return Err(fail(line_no, SdpErrorKind::UnsupportedVersion));
        }

        let mut origin = None;
        let mut name = None;
        let mut desc = SessionDescription {
            origin: Origin {
                username: String::new(),
                session_id: String::new(),
                session_version: String::new(),
                net_type: String::new(),
                addr_type: String::new(),
                address: String::new(),
            },
            name: String::new(),
            information: None,
            uri: None,
            emails: Vec::new(),
            phones: Vec::new(),
            connection: None,
            bandwidths: Vec::new(),
            timings: Vec::new(),
            time_zones: None,
            key: None,
            attributes: Vec::new(),
            media: Vec::new(),
        };

        for (line_no, line) in lines {
            let (kind, value) = split_line(line_no, line)?;

            if let Some(media) = desc.media.last_mut() {
                match kind {
                    'm' => {}
                    'i' => media.information = Some(value.to_string()),
                    'c' => media.connections.push(parse_connection(line_no, value)?),
                    'b' => media.bandwidths.push(value.to_string()),
                    'k' => media.key = Some(value.to_string()),
                    'a' => media.attributes.push(value.to_string()),
                    _ => tracing::trace!(line = line_no, kind = %kind, "ignoring media-level line"),
                }
                if kind != 'm' {
                    continue;
                }
            }

            match kind {
                'o' => origin = Some(parse_origin(line_no, value)?),
                's' => name = Some(value.to_string()),
                'i' => desc.information = Some(value.to_string()),
                'u' => desc.uri = Some(value.to_string()),
                'e' => desc.emails.push(value.to_string()),
                'p' => desc.phones.push(value.to_string()),
                'c' => desc.connection = Some(parse_connection(line_no, value)?),
                'b' => desc.bandwidths.push(value.to_string()),
                't' => desc.timings.push(Timing {
                    active: value.to_string(),
                    repeats: Vec::new(),
                }),
                'r' => match desc.timings.last_mut() {
                    Some(timing) => timing.repeats.push(value.to_string()),
                    None => return Err(fail(line_no, SdpErrorKind::InvalidLine)),
                },
                'z' => desc.time_zones = Some(value.to_string()),
                'k' => desc.key = Some(value.to_string()),
                'a' => desc.attributes.push(value.to_string()),
                'm' => desc.media.push(parse_media(line_no, value)?),
                _ => tracing::trace!(line = line_no, kind = %kind, "ignoring session-level line"),
            }
        }

        desc.origin = origin.ok_or(fail(0, SdpErrorKind::MissingOrigin))?;
        desc.name = name.ok_or(fail(0, SdpErrorKind::MissingSessionName))?;
        Ok(desc)
    }

    /// Parse a raw SAP payload, which must be UTF-8.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload).map_err(|_| fail(0, SdpErrorKind::InvalidUtf8))?;
        Self::parse(text)
    }

    /// Effective connection for a media section: its own `c=` line, else
    /// the session-level one.
    pub fn media_connection(&self, index: usize) -> Option<&Connection> {
        self.media
            .get(index)
            .and_then(|m| m.connections.first())
            .or(self.connection.as_ref())
    }

    /// Group address and port of the first media stream.
    ///
    /// This is where an RTP receiver subscribes to follow the stream.
    pub fn media_group(&self) -> Option<SocketAddr> {
        let media = self.media.first()?;
        let host = self.media_connection(0)?.host()?;
        Some(SocketAddr::new(host, media.port))
    }
}

impl FromStr for SessionDescription {
    type Err = SapError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.origin;
        write!(f, "v=0\r\n")?;
        write!(
            f,
            "o={} {} {} {} {} {}\r\n",
            o.username, o.session_id, o.session_version, o.net_type, o.addr_type, o.address
        )?;
        write!(f, "s={}\r\n", self.name)?;
        if let Some(i) = &self.information {
            write!(f, "i={i}\r\n")?;
        }
        if let Some(u) = &self.uri {
            write!(f, "u={u}\r\n")?;
        }
        for e in &self.emails {
            write!(f, "e={e}\r\n")?;
        }
        for p in &self.phones {
            write!(f, "p={p}\r\n")?;
        }
        if let Some(c) = &self.connection {
            write!(f, "c={c}\r\n")?;
        }
        for b in &self.bandwidths {
            write!(f, "b={b}\r\n")?;
        }
        for t in &self.timings {
            write!(f, "t={}\r\n", t.active)?;
            for r in &t.repeats {
                write!(f, "r={r}\r\n")?;
            }
        }
        if let Some(z) = &self.time_zones {
            write!(f, "z={z}\r\n")?;
        }
        if let Some(k) = &self.key {
            write!(f, "k={k}\r\n")?;
        }
        for a in &self.attributes {
            write!(f, "a={a}\r\n")?;
        }
        for m in &self.media {
            write!(f, "{m}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.net_type, self.addr_type, self.address)
    }
}

impl fmt::Display for Media {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m={} {}", self.kind, self.port)?;
        if let Some(count) = self.port_count {
            write!(f, "/{count}")?;
        }
        write!(f, " {}", self.protocol)?;
        for fmt in &self.formats {
            write!(f, " {fmt}")?;
        }
        write!(f, "\r\n")?;
        if let Some(i) = &self.information {
            write!(f, "i={i}\r\n")?;
        }
        for c in &self.connections {
            write!(f, "c={c}\r\n")?;
        }
        for b in &self.bandwidths {
            write!(f, "b={b}\r\n")?;
        }
        if let Some(k) = &self.key {
            write!(f, "k={k}\r\n")?;
        }
        for a in &self.attributes {
            write!(f, "a={a}\r\n")?;
        }
        Ok(())
    }
}

fn fail(line: usize, kind: SdpErrorKind) -> SapError {
    SapError::SessionDescriptionParseFailed { line, kind }
}

fn split_line(line_no: usize, line: &str) -> Result<(char, &str)> {
    let bytes = line.as_bytes();
    if bytes.len() < 2 || bytes[1] != b'=' || !bytes[0].is_ascii_alphabetic() {
        return Err(fail(line_no, SdpErrorKind::InvalidLine));
    }
    Ok((bytes[0] as char, &line[2..]))
}

fn parse_origin(line_no: usize, value: &str) -> Result<Origin> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    let [username, session_id, session_version, net_type, addr_type, address] = fields[..] else {
        return Err(fail(line_no, SdpErrorKind::InvalidOrigin));
    };
    Ok(Origin {
        username: username.to_string(),
        session_id: session_id.to_string(),
        session_version: session_version.to_string(),
        net_type: net_type.to_string(),
        addr_type: addr_type.to_string(),
        address: address.to_string(),
    })
}

fn parse_connection(line_no: usize, value: &str) -> Result<Connection> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    let [net_type, addr_type, address] = fields[..] else {
        return Err(fail(line_no, SdpErrorKind::InvalidConnection));
    };
    Ok(Connection {
        net_type: net_type.to_string(),
        addr_type: addr_type.to_string(),
        address: address.to_string(),
    })
}

fn parse_media(line_no: usize, value: &str) -> Result<Media> {
    let invalid = || fail(line_no, SdpErrorKind::InvalidMedia);
    let mut fields = value.split_whitespace();
    let kind = fields.next().ok_or_else(invalid)?;
    let ports = fields.next().ok_or_else(invalid)?;
    let protocol = fields.next().ok_or_else(invalid)?;

    let (port, port_count) = match ports.split_once('/') {
        Some((port, count)) => (
            port.parse().map_err(|_| invalid())?,
            Some(count.parse().map_err(|_| invalid())?),
        ),
        None => (ports.parse().map_err(|_| invalid())?, None),
    };

    Ok(Media {
        kind: kind.to_string(),
        port,
        port_count,
        protocol: protocol.to_string(),
        formats: fields.map(str::to_string).collect(),
        information: None,
        connections: Vec::new(),
        bandwidths: Vec::new(),
        key: None,
        attributes: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const ANNOUNCE: &str = "v=0\r\n\
        o=- 3563467 1 IN IP4 10.0.0.7\r\n\
        s=France 2\r\n\
        i=Channel 2\r\n\
        c=IN IP4 239.100.0.2/64\r\n\
        t=0 0\r\n\
        a=tool:mumudvb\r\n\
        a=type:broadcast\r\n\
        m=video 1234 RTP/AVP 33\r\n\
        a=rtpmap:33 MP2T/90000\r\n";

    #[test]
    fn parses_announcement() {
        let desc = SessionDescription::parse(ANNOUNCE).unwrap();
        assert_eq!(desc.origin.session_id, "3563467");
        assert_eq!(desc.origin.address, "10.0.0.7");
        assert_eq!(desc.name, "France 2");
        assert_eq!(desc.information.as_deref(), Some("Channel 2"));
        assert_eq!(desc.attributes, vec!["tool:mumudvb", "type:broadcast"]);
        assert_eq!(desc.media.len(), 1);
        assert_eq!(desc.media[0].kind, "video");
        assert_eq!(desc.media[0].port, 1234);
        assert_eq!(desc.media[0].formats, vec!["33"]);
        assert_eq!(desc.media[0].attributes, vec!["rtpmap:33 MP2T/90000"]);
    }

    #[test]
    fn serialization_reproduces_input() {
        let desc = SessionDescription::parse(ANNOUNCE).unwrap();
        assert_eq!(desc.to_string(), ANNOUNCE);
        assert_eq!(SessionDescription::parse(&desc.to_string()).unwrap(), desc);
    }

    #[test]
    fn media_group_strips_ttl() {
        let desc = SessionDescription::parse(ANNOUNCE).unwrap();
        assert_eq!(
            desc.media_group(),
            Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 100, 0, 2)), 1234))
        );
    }

    #[test]
    fn media_connection_overrides_session() {
        let text = "v=0\no=- 1 1 IN IP6 ::1\ns=x\nc=IN IP6 ff0e::1\nm=audio 5004/2 RTP/AVP 96\nc=IN IP6 ff0e::2\n";
        let desc = SessionDescription::parse(text).unwrap();
        assert_eq!(desc.media[0].port_count, Some(2));
        assert_eq!(
            desc.media_group(),
            Some("[ff0e::2]:5004".parse().unwrap())
        );
    }

    #[test]
    fn accepts_lf_and_trailing_nul() {
        let text = "v=0\no=- 1 1 IN IP4 1.2.3.4\ns=lf\n\n\0\0";
        let desc = SessionDescription::parse(text).unwrap();
        assert_eq!(desc.name, "lf");
        assert!(desc.media_group().is_none());
    }

    #[test]
    fn repeat_lines_attach_to_timing() {
        let text = "v=0\r\no=- 1 1 IN IP4 1.2.3.4\r\ns=r\r\nt=10 20\r\nr=7d 1h 0 25h\r\n";
        let desc = SessionDescription::parse(text).unwrap();
        assert_eq!(desc.timings[0].repeats, vec!["7d 1h 0 25h"]);
        assert_eq!(desc.to_string(), text);
    }

    fn kind_of(text: &str) -> SdpErrorKind {
        match SessionDescription::parse(text) {
            Err(SapError::SessionDescriptionParseFailed { kind, .. }) => kind,
            other => panic!("expected parse failure, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_descriptions() {
        assert_eq!(kind_of(""), SdpErrorKind::Empty);
        assert_eq!(kind_of("w=0\r\n"), SdpErrorKind::MissingVersion);
        assert_eq!(kind_of("v=1\r\n"), SdpErrorKind::UnsupportedVersion);
        assert_eq!(kind_of("v=0\r\nbogus\r\n"), SdpErrorKind::InvalidLine);
        assert_eq!(kind_of("v=0\r\no=- 1\r\n"), SdpErrorKind::InvalidOrigin);
        assert_eq!(kind_of("v=0\r\ns=x\r\n"), SdpErrorKind::MissingOrigin);
        assert_eq!(
            kind_of("v=0\r\no=- 1 1 IN IP4 1.2.3.4\r\n"),
            SdpErrorKind::MissingSessionName
        );
        assert_eq!(
            kind_of("v=0\r\no=- 1 1 IN IP4 1.2.3.4\r\ns=x\r\nm=video abc RTP/AVP 33\r\n"),
            SdpErrorKind::InvalidMedia
        );
        assert_eq!(
            kind_of("v=0\r\no=- 1 1 IN IP4 1.2.3.4\r\ns=x\r\nc=IN IP4\r\n"),
            SdpErrorKind::InvalidConnection
        );
    }

    #[test]
    fn rejects_non_utf8_payload() {
        assert!(matches!(
            SessionDescription::from_payload(&[b'v', b'=', 0xff]),
            Err(SapError::SessionDescriptionParseFailed {
                kind: SdpErrorKind::InvalidUtf8,
                ..
            })
        ));
    }
}
