use std::net::{IpAddr, Ipv4Addr};
use std::process::ExitCode;
use std::time::{Duration, SystemTime};

use clap::{Parser, ValueEnum};
use sap::directory::filter::LivenessPolicy;
use sap::protocol::MessageType;
use sap::transport::MulticastInterface;
use sap::{AdvLifetime, Listener, ListenerConfig, LiveAccumulator, SessionPacket};

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// The full session description.
    Sdp,
    /// One line per announcement.
    Summary,
}

#[derive(Parser)]
#[command(name = "sapdump", about = "Dump SAP session announcements")]
struct Args {
    /// Comma-separated groups to listen on, instead of the SAP defaults
    #[arg(long, value_delimiter = ',')]
    group: Vec<IpAddr>,

    /// Only listen on the IPv4 group
    #[arg(short = '4', conflicts_with = "ipv6")]
    ipv4: bool,

    /// Only listen on the IPv6 groups
    #[arg(short = '6')]
    ipv6: bool,

    /// Local IPv4 address of the interface to join on
    #[arg(long)]
    ifaddr: Option<Ipv4Addr>,

    /// Index of the interface for IPv6 joins
    #[arg(long)]
    ifindex: Option<u32>,

    #[arg(long, value_enum, default_value = "sdp")]
    format: Format,

    /// Show a table of live sessions instead of dumping packets
    #[arg(long)]
    top: bool,

    /// Log skipped packets
    #[arg(short)]
    verbose: bool,
}

impl Args {
    fn listener_config(&self) -> ListenerConfig {
        let mut config = if !self.group.is_empty() {
            ListenerConfig {
                groups: self.group.clone(),
                ..ListenerConfig::default()
            }
        } else if self.ipv4 {
            ListenerConfig::ipv4()
        } else if self.ipv6 {
            ListenerConfig::ipv6()
        } else {
            ListenerConfig::default()
        };

        let defaults = MulticastInterface::default();
        config.interface = MulticastInterface {
            ipv4: self.ifaddr.unwrap_or(defaults.ipv4),
            ipv6_index: self.ifindex.unwrap_or(defaults.ipv6_index),
        };
        config
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = args.listener_config();
    let result = if args.top {
        top(&config)
    } else {
        dump(&config, args.format)
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("sapdump: {e}");
            ExitCode::FAILURE
        }
    }
}

fn dump(config: &ListenerConfig, format: Format) -> sap::Result<()> {
    let (_listener, receptions) = Listener::bind(config)?;
    for reception in receptions {
        match reception.outcome {
            Ok(packet) => match format {
                Format::Sdp => println!("{}", packet.description),
                Format::Summary => println!("{}", summary(&packet)),
            },
            Err(e) => tracing::warn!(source = %reception.source, error = %e, "bad SAP packet"),
        }
    }
    Ok(())
}

fn summary(packet: &SessionPacket) -> String {
    let group = packet
        .description
        .media_group()
        .map_or_else(|| "-".to_string(), |g| g.to_string());
    let kind = match packet.header.message_type {
        MessageType::Announce => "announce",
        MessageType::Delete => "delete",
    };
    format!(
        "{:04x} {:<39} {:<8} {} {}",
        packet.header.msg_id_hash, packet.header.origin, kind, packet.description.name, group
    )
}

fn top(config: &ListenerConfig) -> sap::Result<()> {
    let directory = LiveAccumulator::listen(config)?;
    let policy = LivenessPolicy::default();

    while !directory.is_closed() {
        let mut entries = directory.snapshot(policy.filter());
        entries.sort_by(|a, b| (a.name(), a.identity).cmp(&(b.name(), b.identity)));
        render(&entries);
        directory.wait_for_change_timeout(Duration::from_secs(1));
    }
    Ok(())
}

fn render(entries: &[AdvLifetime]) {
    let now = SystemTime::now();
    // Clear the screen and home the cursor.
    print!("\x1b[2J\x1b[H");
    println!(
        "{:<32} {:>10} {:>6} {:>9}  Group",
        "Session", "Last adv.", "Nb.", "Interval"
    );
    for entry in entries {
        let ago = now.duration_since(entry.last_seen).unwrap_or_default();
        let group = entry
            .description
            .media_group()
            .map_or_else(|| "-".to_string(), |g| g.to_string());
        println!(
            "{:<32} {:>9}s {:>6} {:>8}s  {}",
            entry.name(),
            ago.as_secs(),
            entry.count,
            entry.interval.as_secs(),
            group
        );
    }
}
