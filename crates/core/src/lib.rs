pub mod directory;
pub mod error;
pub mod listener;
pub mod media;
pub mod monitor;
pub mod protocol;
pub mod transport;

pub use directory::{AdvLifetime, AnnouncementIdentity, LiveAccumulator};
pub use error::{Result, SapError};
pub use listener::{Listener, ListenerConfig, Reception};
pub use monitor::{GapEvent, LossReport, MonitorConfig, RtpMonitor};
pub use protocol::{Header, Packet, SessionDescription, SessionPacket};
