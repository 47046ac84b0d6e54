//! Snapshot filters.

use std::time::{Duration, SystemTime};

use crate::directory::AdvLifetime;

/// Decides whether an announcement is still being sent.
///
/// An entry is live while it has been seen within `timeout_factor` times
/// its last re-announcement interval. Entries seen only once have no
/// interval yet and stay live for `grace_period` after first sight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub timeout_factor: u32,
    pub grace_period: Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            timeout_factor: 10,
            grace_period: Duration::from_secs(120),
        }
    }
}

impl LivenessPolicy {
    pub fn is_live_at(&self, entry: &AdvLifetime, now: SystemTime) -> bool {
        let within = |window: Duration| {
            entry
                .last_seen
                .checked_add(window)
                .is_none_or(|deadline| now <= deadline)
        };
        let window = entry
            .interval
            .checked_mul(self.timeout_factor)
            .unwrap_or(Duration::MAX);
        within(window) || (entry.count == 1 && within(self.grace_period))
    }

    /// Filter accepting live entries, evaluated against the current time.
    pub fn filter(self) -> impl Fn(&AdvLifetime) -> bool {
        let now = SystemTime::now();
        move |entry| self.is_live_at(entry, now)
    }
}

/// Accept entries whose session name is in `names`.
pub fn channel_list<I, S>(names: I) -> impl Fn(&AdvLifetime) -> bool
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let names: Vec<String> = names.into_iter().map(Into::into).collect();
    move |entry| names.iter().any(|n| n == entry.name())
}

/// Accept entries both filters accept.
pub fn all_of<A, B>(a: A, b: B) -> impl Fn(&AdvLifetime) -> bool
where
    A: Fn(&AdvLifetime) -> bool,
    B: Fn(&AdvLifetime) -> bool,
{
    move |entry| a(entry) && b(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{AnnouncementIdentity, LiveAccumulator};
    use crate::protocol::{Header, SessionDescription, SessionPacket};
    use std::net::{IpAddr, Ipv4Addr};

    fn t(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 + secs)
    }

    fn entry(name: &str, count: u64, interval: u64, last_seen: SystemTime) -> AdvLifetime {
        let header = Header::announcement(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        AdvLifetime {
            identity: AnnouncementIdentity::of(&header),
            description: SessionDescription::parse(&format!(
                "v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns={name}\r\n"
            ))
            .unwrap(),
            last_seen,
            interval: Duration::from_secs(interval),
            count,
        }
    }

    #[test]
    fn live_within_ten_intervals() {
        let policy = LivenessPolicy::default();
        let e = entry("a", 2, 5, t(0));
        assert!(policy.is_live_at(&e, t(10)));
        assert!(policy.is_live_at(&e, t(50)));
        assert!(!policy.is_live_at(&e, t(51)));
    }

    #[test]
    fn first_sighting_gets_grace_period() {
        let policy = LivenessPolicy::default();
        let e = entry("a", 1, 0, t(0));
        assert!(policy.is_live_at(&e, t(119)));
        assert!(!policy.is_live_at(&e, t(121)));

        // Grace only applies until a second reception supplies an interval.
        let e = entry("a", 2, 1, t(0));
        assert!(!policy.is_live_at(&e, t(60)));
    }

    #[test]
    fn huge_interval_does_not_overflow() {
        let policy = LivenessPolicy {
            timeout_factor: u32::MAX,
            ..LivenessPolicy::default()
        };
        let e = entry("a", 3, u64::MAX / 2, t(0));
        assert!(policy.is_live_at(&e, t(1_000)));
    }

    #[test]
    fn channel_list_matches_names() {
        let keep = channel_list(["France 2", "Arte"]);
        assert!(keep(&entry("Arte", 1, 0, t(0))));
        assert!(!keep(&entry("arte", 1, 0, t(0))));
    }

    #[test]
    fn combined_filters_on_snapshot() {
        let directory = LiveAccumulator::new();
        for (hash, name) in [(1u16, "Arte"), (2, "TF1")] {
            let mut header = Header::announcement(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
            header.msg_id_hash = hash;
            let description =
                SessionDescription::parse(&format!("v=0\r\no=- 1 1 IN IP4 10.0.0.1\r\ns={name}\r\n"))
                    .unwrap();
            directory.ingest(&SessionPacket::new(header, description));
        }

        let live = directory.snapshot(all_of(
            LivenessPolicy::default().filter(),
            channel_list(vec!["TF1".to_string()]),
        ));
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].name(), "TF1");
    }
}
