//! RTP parsing for stream monitoring.
//!
//! ## RTP overview (RFC 3550)
//!
//! Streams announced over SAP are usually RTP over multicast UDP. Every RTP
//! packet carries a 12-byte fixed header ([`rtp::RtpHeader`]) containing:
//!
//! - **Sequence number** (16-bit, wrapping): for reordering and loss detection.
//! - **Timestamp** (32-bit): media clock, typically 90 kHz for video.
//! - **SSRC** (32-bit): randomly chosen to identify the sender.
//! - **Marker bit**: set on the last packet of an access unit (frame).
//!
//! The loss monitor ([`crate::monitor`]) only relies on the sequence number.

pub mod rtp;

pub use rtp::RtpHeader;
