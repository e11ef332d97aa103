//! Network discovery of devices.
//!
//! Devices advertise themselves over mDNS. Discovery browses for a bounded
//! window, then merges the results with the static device list once: a
//! configured entry always overrides and augments a discovered entry with
//! the same identity, and the advertised address is preferred over the
//! hostname to sidestep OS-level mDNS resolution.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use mdns_sd::ServiceDaemon;
use mdns_sd::ServiceEvent;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::DeviceEntry;

/// mDNS service type devices advertise.
pub const SERVICE_TYPE: &str = "_esphomelib._tcp.local.";

/// One device seen during the discovery window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Instance name the device advertises (its configured name).
    pub name: String,
    /// Advertised hostname.
    pub host: String,
    /// Preferred resolved address, if any was advertised.
    pub address: Option<IpAddr>,
    /// Advertised native API port; connection endpoints use their own port.
    pub port: u16,
}

/// Instance name from an mDNS fullname such as
/// `garage._esphomelib._tcp.local.`.
fn instance_name(fullname: &str) -> String {
    fullname
        .strip_suffix(SERVICE_TYPE)
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or(fullname)
        .to_string()
}

/// Pick a usable address: IPv4 outside the link-local range, else IPv6.
fn pick_address<'a>(addresses: impl IntoIterator<Item = &'a IpAddr>) -> Option<IpAddr> {
    let addresses: Vec<IpAddr> = addresses.into_iter().copied().collect();
    addresses
        .iter()
        .copied()
        .find(|a| matches!(a, IpAddr::V4(v4) if !v4.is_link_local()))
        .or_else(|| addresses.iter().copied().find(IpAddr::is_ipv6))
}

/// Browse for devices until the timeout elapses, then stop listening.
///
/// Discovery failures are non-fatal: the static device list still applies.
pub async fn discover(timeout: Duration) -> Vec<DiscoveredDevice> {
    let daemon = match ServiceDaemon::new() {
        Ok(daemon) => daemon,
        Err(e) => {
            warn!("could not start mDNS discovery: {}", e);
            return Vec::new();
        }
    };
    let receiver = match daemon.browse(SERVICE_TYPE) {
        Ok(receiver) => receiver,
        Err(e) => {
            warn!("could not browse for {}: {}", SERVICE_TYPE, e);
            return Vec::new();
        }
    };

    let deadline = Instant::now() + timeout;
    let mut found: Vec<DiscoveredDevice> = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, receiver.recv_async()).await {
            Ok(Ok(ServiceEvent::ServiceResolved(service))) => {
                let device = DiscoveredDevice {
                    name: instance_name(service.get_fullname()),
                    host: service.get_hostname().trim_end_matches('.').to_string(),
                    address: pick_address(
                        service
                            .get_addresses()
                            .iter()
                            .map(|a| a.to_ip_addr())
                            .collect::<Vec<_>>()
                            .iter(),
                    ),
                    port: service.get_port(),
                };
                debug!(
                    "discovered {} at {} ({:?}, port {})",
                    device.name, device.host, device.address, device.port
                );
                if !found.contains(&device) {
                    found.push(device);
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!("mDNS receive error: {}", e);
                break;
            }
            Err(_) => break,
        }
    }

    let _ = daemon.stop_browse(SERVICE_TYPE);
    let _ = daemon.shutdown();
    info!("discovery finished with {} device(s)", found.len());
    found
}

/// Merge discovery results into the configured device list.
///
/// Config entries are matched by host identity (hostname, address, or
/// advertised name). A matched entry keeps its configuration but takes the
/// advertised address and name as endpoint and topic-prefix fallbacks;
/// unmatched discoveries become plain entries; the remaining configured
/// devices pass through unchanged.
pub fn merge(config_devices: &[DeviceEntry], discovered: Vec<DiscoveredDevice>) -> Vec<DeviceEntry> {
    let mut merged = Vec::new();
    let mut matched_hosts: HashSet<String> = HashSet::new();

    for device in discovered {
        let address = device.address.map(|a| a.to_string());
        let config_entry = config_devices.iter().find(|entry| {
            entry.host == device.host
                || Some(&entry.host) == address.as_ref()
                || entry.host == device.name
        });

        let mut entry = match config_entry {
            Some(entry) => {
                matched_hosts.insert(entry.host.clone());
                entry.clone()
            }
            None => DeviceEntry::for_host(device.host.clone()),
        };

        if let Some(address) = address {
            entry.host = address;
        }
        if entry.topic_prefix.is_none() {
            entry.topic_prefix = Some(device.name.clone());
        }
        merged.push(entry);
    }

    for entry in config_devices {
        if !matched_hosts.contains(&entry.host) {
            merged.push(entry.clone());
        }
    }

    merged
}
