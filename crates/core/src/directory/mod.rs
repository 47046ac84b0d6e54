//! Live directory of announced sessions.
//!
//! The [`LiveAccumulator`] consumes decoded SAP packets and keeps one
//! [`AdvLifetime`] per announcement, keyed by message-id hash and origin.
//! Readers take filtered snapshots and can block until the directory
//! changes; the [`filter`] module provides the usual filters.
//!
//! Entries are never evicted. Liveness is decided at read time by
//! [`filter::LivenessPolicy`] from the observed re-announcement interval.

pub mod filter;

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, SystemTime};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::error::Result;
use crate::listener::{Listener, ListenerConfig, Reception};
use crate::protocol::{Header, MessageType, SessionDescription, SessionPacket};

/// How often the ingest thread checks whether the directory was closed.
const INGEST_POLL: Duration = Duration::from_millis(100);

/// Key of a directory entry.
///
/// IPv4 origins are stored as IPv4-mapped IPv6 addresses so that one key
/// type covers both families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnnouncementIdentity {
    pub msg_id_hash: u16,
    pub origin: Ipv6Addr,
}

impl AnnouncementIdentity {
    pub fn of(header: &Header) -> Self {
        let origin = match header.origin {
            IpAddr::V4(addr) => addr.to_ipv6_mapped(),
            IpAddr::V6(addr) => addr,
        };
        Self {
            msg_id_hash: header.msg_id_hash,
            origin,
        }
    }
}

impl fmt::Display for AnnouncementIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}@{}",
            self.msg_id_hash,
            IpAddr::V6(self.origin).to_canonical()
        )
    }
}

/// One announcement as seen so far.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvLifetime {
    pub identity: AnnouncementIdentity,
    /// Most recent description received.
    pub description: SessionDescription,
    pub last_seen: SystemTime,
    /// Gap between the last two receptions; zero until seen twice.
    pub interval: Duration,
    /// Number of receptions.
    pub count: u64,
}

impl AdvLifetime {
    fn first(identity: AnnouncementIdentity, description: SessionDescription, now: SystemTime) -> Self {
        Self {
            identity,
            description,
            last_seen: now,
            interval: Duration::ZERO,
            count: 1,
        }
    }

    fn refresh(&mut self, description: SessionDescription, now: SystemTime) {
        // A clock step backwards yields a zero interval instead of an error.
        self.interval = now.duration_since(self.last_seen).unwrap_or_default();
        self.last_seen = now;
        self.description = description;
        self.count += 1;
    }

    /// Session name (`s=`).
    pub fn name(&self) -> &str {
        &self.description.name
    }
}

#[derive(Debug, Default)]
struct ChangeState {
    generation: u64,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    entries: RwLock<HashMap<AnnouncementIdentity, Arc<AdvLifetime>>>,
    changes: Mutex<ChangeState>,
    changed: Condvar,
}

impl Shared {
    fn close(&self) {
        let mut state = self.changes.lock();
        if !state.closed {
            state.closed = true;
            tracing::debug!("SAP directory closed");
        }
        self.changed.notify_all();
    }
}

/// Closes the directory once the last caller handle is gone, which ends
/// the ingest thread and with it the listener.
#[derive(Debug)]
struct IngestGuard(Arc<Shared>);

impl Drop for IngestGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Thread-safe directory of announcements.
///
/// Cloning yields another handle on the same directory. Writes come from a
/// single ingest thread; any number of readers may snapshot or wait
/// concurrently. Dropping every handle returned by [`listen`](Self::listen)
/// or [`spawn`](Self::spawn) closes the directory.
#[derive(Debug, Clone, Default)]
pub struct LiveAccumulator {
    shared: Arc<Shared>,
    guard: Option<Arc<IngestGuard>>,
}

impl LiveAccumulator {
    /// An empty directory with no ingest thread.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the configured SAP groups and ingest whatever arrives.
    ///
    /// The listener lives on the ingest thread and is stopped when the
    /// directory is closed.
    pub fn listen(config: &ListenerConfig) -> Result<Self> {
        let (listener, receptions) = Listener::bind(config)?;
        Self::start(receptions, Some(listener))
    }

    /// Ingest receptions from an already running listener.
    ///
    /// The directory closes itself once the sending side hangs up.
    pub fn spawn(receptions: Receiver<Reception>) -> Result<Self> {
        Self::start(receptions, None)
    }

    fn start(receptions: Receiver<Reception>, listener: Option<Listener>) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        // The ingest thread's handle carries no guard, so it cannot keep
        // the directory open on its own.
        let ingest = Self {
            shared: shared.clone(),
            guard: None,
        };
        thread::Builder::new()
            .name("sap-directory".to_string())
            .spawn(move || ingest.ingest_loop(receptions, listener))?;
        Ok(Self {
            guard: Some(Arc::new(IngestGuard(shared.clone()))),
            shared,
        })
    }

    fn ingest_loop(&self, receptions: Receiver<Reception>, listener: Option<Listener>) {
        while !self.is_closed() {
            match receptions.recv_timeout(INGEST_POLL) {
                Ok(reception) => match reception.outcome {
                    Ok(packet) => {
                        self.ingest(&packet);
                    }
                    Err(e) => tracing::trace!(source = %reception.source, error = %e, "not ingested"),
                },
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!("SAP listener gone, closing directory");
                    break;
                }
            }
        }
        drop(listener);
        self.close();
    }

    /// Record a received packet, timestamped now.
    ///
    /// Returns whether the directory changed.
    pub fn ingest(&self, packet: &SessionPacket) -> bool {
        self.ingest_at(packet, SystemTime::now())
    }

    /// Record a packet received at `now`.
    ///
    /// Deletion messages are ignored; their entries age out through the
    /// liveness filter like any other.
    pub fn ingest_at(&self, packet: &SessionPacket, now: SystemTime) -> bool {
        let identity = AnnouncementIdentity::of(&packet.header);
        if packet.header.message_type == MessageType::Delete {
            tracing::debug!(%identity, "ignoring SAP deletion");
            return false;
        }

        let description = packet.description.clone();
        {
            let mut entries = self.shared.entries.write();
            match entries.get_mut(&identity) {
                Some(entry) => {
                    let entry = Arc::make_mut(entry);
                    entry.refresh(description, now);
                    tracing::trace!(%identity, count = entry.count, interval = ?entry.interval, "announcement refreshed");
                }
                None => {
                    tracing::info!(%identity, session = %description.name, "new announcement");
                    entries.insert(
                        identity,
                        Arc::new(AdvLifetime::first(identity, description, now)),
                    );
                }
            }
        }

        self.publish();
        true
    }

    fn publish(&self) {
        let mut state = self.shared.changes.lock();
        state.generation = state.generation.wrapping_add(1);
        self.shared.changed.notify_all();
    }

    /// Copy out every entry accepted by `filter`.
    ///
    /// Only entry pointers are copied under the read lock; filtering and
    /// the deep copies happen after it is released.
    pub fn snapshot<F>(&self, filter: F) -> Vec<AdvLifetime>
    where
        F: Fn(&AdvLifetime) -> bool,
    {
        let entries: Vec<Arc<AdvLifetime>> =
            self.shared.entries.read().values().cloned().collect();
        entries
            .into_iter()
            .filter(|e| filter(e))
            .map(Arc::unwrap_or_clone)
            .collect()
    }

    pub fn get(&self, identity: &AnnouncementIdentity) -> Option<AdvLifetime> {
        let entry = self.shared.entries.read().get(identity).cloned();
        entry.map(Arc::unwrap_or_clone)
    }

    pub fn len(&self) -> usize {
        self.shared.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until an ingest changes the directory.
    ///
    /// Returns `false` once the directory is closed; no further change
    /// will be signalled after that.
    pub fn wait_for_change(&self) -> bool {
        let mut state = self.shared.changes.lock();
        let seen = state.generation;
        while state.generation == seen && !state.closed {
            self.shared.changed.wait(&mut state);
        }
        state.generation != seen
    }

    /// Like [`wait_for_change`](Self::wait_for_change), giving up after
    /// `timeout`.
    pub fn wait_for_change_timeout(&self, timeout: Duration) -> bool {
        let mut state = self.shared.changes.lock();
        let seen = state.generation;
        while state.generation == seen && !state.closed {
            if self.shared.changed.wait_for(&mut state, timeout).timed_out() {
                break;
            }
        }
        state.generation != seen
    }

    /// Stop ingesting and wake every waiter.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.changes.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Datagram, DatagramSource};
    use std::io;
    use std::net::{Ipv4Addr, SocketAddr};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::Instant;

    fn packet(hash: u16, origin: IpAddr, name: &str) -> SessionPacket {
        let mut header = Header::announcement(origin);
        header.msg_id_hash = hash;
        let description = SessionDescription::parse(&format!(
            "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns={name}\r\nc=IN IP4 239.1.1.1\r\nm=video 1234 RTP/AVP 33\r\n"
        ))
        .unwrap();
        SessionPacket::new(header, description)
    }

    fn origin() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))
    }

    #[test]
    fn identity_normalizes_ipv4() {
        let v4 = AnnouncementIdentity::of(&packet(7, origin(), "a").header);
        let mapped = AnnouncementIdentity::of(
            &packet(7, IpAddr::V6(Ipv4Addr::new(10, 0, 0, 1).to_ipv6_mapped()), "a").header,
        );
        assert_eq!(v4, mapped);
        assert_eq!(v4.to_string(), "0007@10.0.0.1");
    }

    #[test]
    fn reannouncement_tracks_interval() {
        let directory = LiveAccumulator::new();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);

        assert!(directory.ingest_at(&packet(1, origin(), "first"), t0));
        let id = AnnouncementIdentity::of(&packet(1, origin(), "first").header);
        let entry = directory.get(&id).unwrap();
        assert_eq!(entry.count, 1);
        assert_eq!(entry.interval, Duration::ZERO);

        let t1 = t0 + Duration::from_secs(5);
        directory.ingest_at(&packet(1, origin(), "renamed"), t1);
        let entry = directory.get(&id).unwrap();
        assert_eq!(entry.count, 2);
        assert_eq!(entry.interval, Duration::from_secs(5));
        assert_eq!(entry.last_seen, t1);
        assert_eq!(entry.name(), "renamed");
        assert_eq!(directory.len(), 1);
    }

    #[test]
    fn clock_step_back_gives_zero_interval() {
        let directory = LiveAccumulator::new();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        directory.ingest_at(&packet(1, origin(), "x"), t0);
        directory.ingest_at(&packet(1, origin(), "x"), t0 - Duration::from_secs(3));
        let entry = &directory.snapshot(|_| true)[0];
        assert_eq!(entry.interval, Duration::ZERO);
        assert_eq!(entry.count, 2);
    }

    #[test]
    fn distinct_origins_are_distinct_entries() {
        let directory = LiveAccumulator::new();
        directory.ingest(&packet(1, origin(), "a"));
        directory.ingest(&packet(1, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), "b"));
        directory.ingest(&packet(2, origin(), "c"));
        assert_eq!(directory.len(), 3);

        let mut names: Vec<_> = directory
            .snapshot(|e| e.name() != "b")
            .into_iter()
            .map(|e| e.description.name)
            .collect();
        names.sort();
        assert_eq!(names, ["a", "c"]);
    }

    #[test]
    fn deletions_are_not_ingested() {
        let directory = LiveAccumulator::new();
        let mut delete = packet(1, origin(), "gone");
        delete.header.message_type = MessageType::Delete;
        assert!(!directory.ingest(&delete));
        assert!(directory.is_empty());
    }

    #[test]
    fn wait_wakes_on_ingest() {
        let directory = LiveAccumulator::new();
        let waiter = {
            let directory = directory.clone();
            thread::spawn(move || directory.wait_for_change())
        };
        // Keep publishing until the waiter has observed a change.
        while !waiter.is_finished() {
            directory.ingest(&packet(1, origin(), "a"));
            thread::sleep(Duration::from_millis(5));
        }
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn close_releases_waiters() {
        let directory = LiveAccumulator::new();
        let waiter = {
            let directory = directory.clone();
            thread::spawn(move || directory.wait_for_change())
        };
        thread::sleep(Duration::from_millis(20));
        directory.close();
        assert!(!waiter.join().unwrap());
        assert!(!directory.wait_for_change());
    }

    #[test]
    fn earlier_copies_survive_refresh() {
        let directory = LiveAccumulator::new();
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        directory.ingest_at(&packet(1, origin(), "before"), t0);

        let before = directory.snapshot(|_| true);
        directory.ingest_at(&packet(1, origin(), "after"), t0 + Duration::from_secs(1));

        assert_eq!(before[0].name(), "before");
        assert_eq!(before[0].count, 1);
        let after = directory.snapshot(|_| true);
        assert_eq!(after[0].name(), "after");
        assert_eq!(after[0].count, 2);
    }

    /// Never yields a datagram; records when the receive loop lets go of it.
    struct Silent(Arc<AtomicBool>);

    impl DatagramSource for Silent {
        fn recv_datagram(&mut self, _buf: &mut [u8]) -> io::Result<Datagram> {
            thread::sleep(Duration::from_millis(5));
            Err(io::ErrorKind::WouldBlock.into())
        }

        fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for Silent {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn dropping_handles_stops_listener() {
        let released = Arc::new(AtomicBool::new(false));
        let (listener, receptions) =
            Listener::spawn(Silent(released.clone()), &ListenerConfig::default()).unwrap();
        let directory = LiveAccumulator::start(receptions, Some(listener)).unwrap();
        let reader = directory.clone();

        drop(directory);
        thread::sleep(Duration::from_millis(50));
        assert!(!reader.is_closed());

        drop(reader);
        let deadline = Instant::now() + Duration::from_secs(2);
        while !released.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "listener still running");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn wait_timeout_without_change() {
        let directory = LiveAccumulator::new();
        assert!(!directory.wait_for_change_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn spawned_directory_consumes_receptions() {
        let (tx, rx) = mpsc::sync_channel(4);
        let directory = LiveAccumulator::spawn(rx).unwrap();
        let source = SocketAddr::new(origin(), 9875);

        tx.send(Reception {
            source,
            len: 0,
            outcome: Err(crate::error::SapError::MalformedPayloadType),
        })
        .unwrap();
        tx.send(Reception {
            source,
            len: 0,
            outcome: Ok(packet(9, origin(), "live")),
        })
        .unwrap();

        while directory.is_empty() {
            assert!(directory.wait_for_change_timeout(Duration::from_secs(2)));
        }
        assert_eq!(directory.snapshot(|_| true)[0].name(), "live");

        drop(tx);
        while !directory.is_closed() {
            directory.wait_for_change_timeout(Duration::from_millis(50));
        }
        assert!(!directory.wait_for_change());
    }
}
