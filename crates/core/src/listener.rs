use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Result, SapError};
use crate::protocol::{Packet, SessionPacket};
use crate::transport::udp::{self, DatagramSource, MulticastInterface, MulticastSocket, SAP_PORT};

/// Listener configuration.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Multicast groups to join, all on the same socket.
    pub groups: Vec<IpAddr>,
    pub port: u16,
    pub interface: MulticastInterface,
    /// Capacity of the decoded-packet queue. When it is full the newest
    /// packet is dropped and a warning logged; the receive loop never blocks.
    pub queue_capacity: usize,
    /// Receive buffer size; longer datagrams are truncated by the OS.
    pub max_datagram: usize,
    /// How often the receive loop checks whether it was stopped.
    pub poll_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            groups: udp::default_sap_groups(),
            port: SAP_PORT,
            interface: MulticastInterface::default(),
            queue_capacity: 30,
            max_datagram: 1500,
            poll_interval: Duration::from_millis(250),
        }
    }
}

impl ListenerConfig {
    /// Listen on the IPv4 SAP group only.
    pub fn ipv4() -> Self {
        Self {
            groups: vec![IpAddr::V4(udp::SAP_GROUP_V4)],
            ..Self::default()
        }
    }

    /// Listen on the scoped IPv6 SAP groups only.
    pub fn ipv6() -> Self {
        Self {
            groups: udp::ipv6_sap_groups(),
            ..Self::default()
        }
    }
}

/// One received datagram and what decoding it produced.
#[derive(Debug)]
pub struct Reception {
    pub source: SocketAddr,
    /// Datagram size in bytes.
    pub len: usize,
    pub outcome: Result<SessionPacket>,
}

/// Decode a SAP datagram and parse its SDP payload.
pub fn decode_session(buf: &[u8]) -> Result<SessionPacket> {
    Packet::decode(buf)?.into_session()
}

/// Background SAP receive loop.
///
/// Reads datagrams from a [`DatagramSource`], decodes each one and pushes
/// a [`Reception`] into a bounded queue, successes and failures alike.
/// Decode errors never stop the loop; a socket error or a dropped receiver
/// does.
pub struct Listener {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    /// Join the configured SAP groups and start receiving.
    pub fn bind(config: &ListenerConfig) -> Result<(Self, Receiver<Reception>)> {
        let socket = MulticastSocket::join(&config.groups, config.port, config.interface)?;
        tracing::info!(
            groups = ?config.groups,
            port = config.port,
            "SAP listener joined groups"
        );
        Self::spawn(socket, config)
    }

    /// Start receiving from an arbitrary source.
    pub fn spawn<S>(mut source: S, config: &ListenerConfig) -> Result<(Self, Receiver<Reception>)>
    where
        S: DatagramSource + 'static,
    {
        source.set_read_timeout(Some(config.poll_interval))?;
        let (tx, rx) = mpsc::sync_channel(config.queue_capacity);
        let running = Arc::new(AtomicBool::new(true));

        let flag = running.clone();
        let max_datagram = config.max_datagram;
        let handle = thread::Builder::new()
            .name("sap-listener".to_string())
            .spawn(move || receive_loop(source, tx, flag, max_datagram))?;

        Ok((
            Self {
                running,
                handle: Some(handle),
            },
            rx,
        ))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the receive loop and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("SAP listener thread panicked");
            }
            tracing::info!("SAP listener stopped");
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn receive_loop<S: DatagramSource>(
    mut source: S,
    queue: SyncSender<Reception>,
    running: Arc<AtomicBool>,
    max_datagram: usize,
) {
    let mut buf = vec![0u8; max_datagram];

    while running.load(Ordering::SeqCst) {
        let datagram = match source.recv_datagram(&mut buf) {
            Ok(d) => d,
            Err(ref e)
                if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) =>
            {
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SAP receive failed, listener exiting");
                break;
            }
        };

        let outcome = decode_session(&buf[..datagram.len]);
        match &outcome {
            Ok(packet) => tracing::trace!(
                source = %datagram.source,
                session = %packet.description.name,
                "SAP announcement"
            ),
            Err(e) => tracing::debug!(source = %datagram.source, error = %e, "skipping SAP packet"),
        }

        let reception = Reception {
            source: datagram.source,
            len: datagram.len,
            outcome,
        };
        match queue.try_send(reception) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    source = %dropped.source,
                    error = %SapError::QueueFull,
                    "dropping SAP packet, consumer too slow"
                );
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::debug!("SAP consumer gone, listener exiting");
                break;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    tracing::debug!("SAP receive loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Datagram;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;

    const SDP_PACKET: &[u8] = b"\x20\x00\xf8\x30\x0a\x00\x00\x01v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns=One\r\n";

    /// Replays datagrams, then reports an unrecoverable error.
    struct Replay(VecDeque<Vec<u8>>);

    impl DatagramSource for Replay {
        fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<Datagram> {
            let next = self
                .0
                .pop_front()
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionReset, "done"))?;
            buf[..next.len()].copy_from_slice(&next);
            Ok(Datagram {
                len: next.len(),
                source: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 9875),
                destination: None,
            })
        }

        fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    fn config(capacity: usize) -> ListenerConfig {
        ListenerConfig {
            queue_capacity: capacity,
            ..ListenerConfig::default()
        }
    }

    #[test]
    fn decode_session_reports_each_stage() {
        assert_eq!(decode_session(SDP_PACKET).unwrap().description.name, "One");
        assert!(matches!(
            decode_session(&SDP_PACKET[..3]),
            Err(SapError::TooShort { .. })
        ));
        assert!(matches!(
            decode_session(b"\x20\x00\x00\x01\x0a\x00\x00\x01text/plain\0hi"),
            Err(SapError::NotSessionDescription(_))
        ));
    }

    #[test]
    fn errors_do_not_stop_the_loop() {
        let source = Replay(VecDeque::from(vec![
            b"\x20".to_vec(),
            SDP_PACKET.to_vec(),
            b"\x60\x00\x00\x00".to_vec(),
        ]));
        let (mut listener, rx) = Listener::spawn(source, &config(8)).unwrap();

        let outcomes: Vec<_> = rx.iter().map(|r| r.outcome).collect();
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], Err(SapError::TooShort { .. })));
        assert!(outcomes[1].is_ok());
        assert!(matches!(outcomes[2], Err(SapError::UnsupportedVersion(3))));

        listener.stop();
        assert!(!listener.is_running());
    }

    #[test]
    fn full_queue_drops_newest() {
        let datagrams = (0..5u8).map(|i| vec![0x60; 9 + i as usize]).collect();
        let (mut listener, rx) = Listener::spawn(Replay(datagrams), &config(2)).unwrap();
        while listener.is_running() {
            thread::sleep(Duration::from_millis(5));
        }
        listener.stop();

        let lens: Vec<usize> = rx.try_iter().map(|r| r.len).collect();
        assert_eq!(lens, [9, 10]);
    }

    #[test]
    fn ip_family_presets() {
        assert_eq!(ListenerConfig::ipv4().groups.len(), 1);
        assert!(ListenerConfig::ipv6().groups.iter().all(IpAddr::is_ipv6));
        assert_eq!(ListenerConfig::default().port, 9875);
    }
}
