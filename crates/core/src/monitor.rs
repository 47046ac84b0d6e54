//! RTP loss monitoring.
//!
//! One [`RtpMonitor`] follows one announced channel: it reads the channel's
//! multicast group, tracks the 16-bit RTP sequence number and reports gaps,
//! restarts and silence. Monitors share nothing; a stalled or failed
//! channel only ends its own monitor, and the supervising loop starts a
//! new one when the channel is announced again.

use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Result, SapError};
use crate::media::RtpHeader;
use crate::transport::{DatagramSource, MulticastInterface, MulticastSocket};

/// Silence after which a monitor gives up.
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(120);

/// A jump to sequence 0 from at most this value is taken as an emitter
/// restart rather than a wrap.
pub const RESET_THRESHOLD: u16 = 65500;

/// What the sequence tracker noticed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapEvent {
    /// First valid packet.
    StreamStart { sequence: u16 },
    /// Sequence restarted at 0 well before wrapping.
    StreamReset { previous: u16 },
    Lost { sequence: u16 },
    /// Inclusive, may wrap past 65535.
    LostRange { first: u16, last: u16 },
}

impl GapEvent {
    /// Lost sequence numbers as an inclusive range, if any were lost.
    pub fn lost(&self) -> Option<(u16, u16)> {
        match *self {
            Self::Lost { sequence } => Some((sequence, sequence)),
            Self::LostRange { first, last } => Some((first, last)),
            Self::StreamStart { .. } | Self::StreamReset { .. } => None,
        }
    }
}

impl fmt::Display for GapEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamStart { sequence } => write!(f, "stream start at sequence {sequence}"),
            Self::StreamReset { previous } => {
                write!(f, "stream reset after sequence {previous}, emitter restarted?")
            }
            Self::Lost { sequence } => write!(f, "lost packet {sequence}"),
            Self::LostRange { first, last } => write!(f, "lost packets {first} to {last}"),
        }
    }
}

/// A [`GapEvent`] tagged with the channel it happened on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LossReport {
    pub channel: String,
    pub event: GapEvent,
}

/// Sequence number state of one stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequenceTracker {
    last: Option<u16>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<u16> {
        self.last
    }

    /// Feed the next sequence number, in arrival order.
    pub fn observe(&mut self, sequence: u16) -> Option<GapEvent> {
        let Some(last) = self.last.replace(sequence) else {
            return Some(GapEvent::StreamStart { sequence });
        };

        let expected = last.wrapping_add(1);
        if sequence == expected {
            None
        } else if sequence == 0 && last <= RESET_THRESHOLD {
            Some(GapEvent::StreamReset { previous: last })
        } else if expected == sequence.wrapping_sub(1) {
            Some(GapEvent::Lost { sequence: expected })
        } else {
            Some(GapEvent::LostRange {
                first: expected,
                last: sequence.wrapping_sub(1),
            })
        }
    }
}

/// Monitor configuration.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub watchdog: Duration,
    pub max_datagram: usize,
    /// Interface for the group join in [`spawn_monitor`].
    pub interface: MulticastInterface,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            watchdog: DEFAULT_WATCHDOG,
            max_datagram: 1500,
            interface: MulticastInterface::default(),
        }
    }
}

/// Loss monitor for one channel.
pub struct RtpMonitor {
    channel: String,
    destination: IpAddr,
    config: MonitorConfig,
    tracker: SequenceTracker,
}

impl RtpMonitor {
    /// Monitor traffic sent to `destination` for `channel`.
    pub fn new(channel: impl Into<String>, destination: IpAddr, config: MonitorConfig) -> Self {
        Self {
            channel: channel.into(),
            destination: destination.to_canonical(),
            config,
            tracker: SequenceTracker::new(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Read `source` until the stream stops, calling `on_event` for every
    /// event. Events are logged as well.
    ///
    /// Datagrams whose reported destination differs from the monitored one
    /// are skipped. [`MulticastSocket`] reports the group it is bound to
    /// rather than a per-datagram address, so with it the kernel's bind does
    /// the filtering and this check only rejects traffic from sources that
    /// report a real destination.
    ///
    /// Returns why monitoring stopped: [`SapError::ReadTimeout`] after a
    /// watchdog period without a datagram for this destination,
    /// [`SapError::MalformedRtpPacket`] on the first non-RTP datagram, or
    /// [`SapError::Socket`] when reading fails.
    pub fn run<S, F>(&mut self, source: &mut S, mut on_event: F) -> SapError
    where
        S: DatagramSource + ?Sized,
        F: FnMut(&LossReport),
    {
        let watchdog = self.config.watchdog;
        let mut buf = vec![0u8; self.config.max_datagram];
        let mut deadline = Instant::now() + watchdog;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.timed_out();
            }
            if let Err(e) = source.set_read_timeout(Some(remaining)) {
                return e.into();
            }

            let datagram = match source.recv_datagram(&mut buf) {
                Ok(d) => d,
                Err(ref e)
                    if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
                {
                    return self.timed_out();
                }
                Err(e) => {
                    tracing::warn!(channel = %self.channel, error = %e, "RTP receive failed");
                    return e.into();
                }
            };

            if let Some(to) = datagram.destination
                && to.to_canonical() != self.destination
            {
                tracing::trace!(channel = %self.channel, destination = %to, "foreign datagram");
                continue;
            }

            let header = match RtpHeader::parse(&buf[..datagram.len]) {
                Ok(h) => h,
                Err(e) => {
                    tracing::debug!(
                        channel = %self.channel,
                        source = %datagram.source,
                        error = %e,
                        "not an RTP stream, monitor stopped"
                    );
                    return e;
                }
            };
            deadline = Instant::now() + watchdog;

            if let Some(event) = self.tracker.observe(header.sequence) {
                self.log(&event);
                on_event(&LossReport {
                    channel: self.channel.clone(),
                    event,
                });
            }
        }
    }

    fn timed_out(&self) -> SapError {
        tracing::warn!(
            channel = %self.channel,
            watchdog = ?self.config.watchdog,
            "no RTP traffic, monitor stopped"
        );
        SapError::ReadTimeout(self.config.watchdog)
    }

    fn log(&self, event: &GapEvent) {
        let channel = self.channel.as_str();
        match *event {
            GapEvent::StreamStart { sequence } => {
                tracing::info!(channel, sequence, "RTP stream start")
            }
            GapEvent::StreamReset { previous } => {
                tracing::warn!(channel, previous, "RTP stream reset, emitter restarted?")
            }
            GapEvent::Lost { sequence } => {
                tracing::warn!(channel, first = sequence, last = sequence, "RTP packet lost")
            }
            GapEvent::LostRange { first, last } => {
                tracing::warn!(channel, first, last, "RTP packets lost")
            }
        }
    }
}

/// Join `group` and monitor it on a dedicated thread.
///
/// The thread ends on its own; its result is the reason it stopped.
pub fn spawn_monitor<F>(
    channel: impl Into<String>,
    group: SocketAddr,
    config: MonitorConfig,
    on_event: F,
) -> Result<JoinHandle<SapError>>
where
    F: FnMut(&LossReport) + Send + 'static,
{
    let channel = channel.into();
    let mut socket = MulticastSocket::join(&[group.ip()], group.port(), config.interface)?;
    tracing::info!(%channel, %group, "monitoring RTP");

    let mut monitor = RtpMonitor::new(channel.clone(), group.ip(), config);
    let handle = thread::Builder::new()
        .name(format!("rtp-{channel}"))
        .spawn(move || monitor.run(&mut socket, on_event))?;
    Ok(handle)
}
