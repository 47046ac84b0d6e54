use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::thread::JoinHandle;

use clap::Parser;
use sap::directory::filter::{LivenessPolicy, all_of, channel_list};
use sap::monitor::spawn_monitor;
use sap::transport::MulticastSocket;
use sap::{ListenerConfig, LiveAccumulator, MonitorConfig, RtpMonitor, SapError};

#[derive(Parser)]
#[command(name = "rtpdump", about = "Report packet loss on multicast RTP streams")]
struct Args {
    /// Group carrying the stream
    #[arg(long, requires = "port", conflicts_with = "channel")]
    group: Option<IpAddr>,

    /// Port carrying the stream
    #[arg(long, requires = "group")]
    port: Option<u16>,

    /// Comma-separated channels to find in SAP announcements. Defaults to
    /// every announced channel
    #[arg(long, value_delimiter = ',')]
    channel: Option<Vec<String>>,

    /// Log malformed packets
    #[arg(short)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = MonitorConfig::default();
    let result = match (args.group, args.port) {
        (Some(group), Some(port)) => watch(SocketAddr::new(group, port), config),
        _ => follow_announcements(args.channel, config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("rtpdump: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Monitor a single stream until it stops.
fn watch(group: SocketAddr, config: MonitorConfig) -> sap::Result<()> {
    let mut socket = MulticastSocket::join(&[group.ip()], group.port(), config.interface)?;
    let mut monitor = RtpMonitor::new(group.to_string(), group.ip(), config);
    match monitor.run(&mut socket, |_| {}) {
        SapError::ReadTimeout(_) | SapError::MalformedRtpPacket { .. } => Ok(()),
        e => Err(e),
    }
}

/// Monitor every live announced channel, restarting monitors that stopped
/// when their channel is announced again.
fn follow_announcements(channels: Option<Vec<String>>, config: MonitorConfig) -> sap::Result<()> {
    let directory = LiveAccumulator::listen(&ListenerConfig::default())?;
    let mut monitors: HashMap<String, JoinHandle<SapError>> = HashMap::new();

    while directory.wait_for_change() {
        let live = LivenessPolicy::default().filter();
        let entries = match &channels {
            Some(names) => directory.snapshot(all_of(live, channel_list(names.clone()))),
            None => directory.snapshot(live),
        };

        for entry in entries {
            let name = entry.name().to_string();
            if monitors.get(&name).is_some_and(|m| !m.is_finished()) {
                continue;
            }
            if let Some(stopped) = monitors.remove(&name) {
                match stopped.join() {
                    Ok(reason) => tracing::debug!(channel = %name, %reason, "restarting monitor"),
                    Err(_) => tracing::error!(channel = %name, "monitor panicked"),
                }
            }

            let Some(group) = entry.description.media_group() else {
                tracing::warn!(channel = %name, "announcement has no media group");
                continue;
            };
            tracing::info!(channel = %name, %group, "found channel");
            match spawn_monitor(name.clone(), group, config, |_| {}) {
                Ok(handle) => {
                    monitors.insert(name, handle);
                }
                Err(e) => tracing::warn!(channel = %name, error = %e, "could not join RTP group"),
            }
        }
    }
    Ok(())
}
