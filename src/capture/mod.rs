pub mod sniffer;

pub use sniffer::{parse_frame, LinkLayer, NetworkHeader, PacketSniffer, ParsedPacket, SnifferStats};

use serde::Serialize;

use crate::error::{FlowError, Result};

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInterface {
    pub name: String,
    pub description: String,
    pub is_up: bool,
}

impl From<pcap::Device> for NetworkInterface {
    fn from(d: pcap::Device) -> Self {
        let description = d.desc.unwrap_or_else(|| {
            if d.name.starts_with("br-") || d.name == "docker0" { "Docker Bridge".into() }
            else if d.name.starts_with("en") || d.name.starts_with("eth") { "Ethernet Interface".into() }
            else if d.name.starts_with("wl") { "Wi-Fi Interface".into() }
            else { "Network Interface".into() }
        });
        NetworkInterface { name: d.name, description, is_up: d.flags.is_up() }
    }
}

/// Capture-capable NICs, bridges and virtual adapters; loopback excluded.
pub fn list_interfaces() -> Result<Vec<NetworkInterface>> {
    let devices = pcap::Device::list()?;

    let want_prefixes = ["en", "eth", "wl", "br-", "docker", "veth", "virbr", "vboxnet"];

    Ok(devices
        .into_iter()
        .filter(|d| {
            let n = d.name.as_str();
            want_prefixes.iter().any(|p| n.starts_with(p)) && !d.flags.is_loopback()
        })
        .map(NetworkInterface::from)
        .collect())
}

pub fn interface_info(interface_name: &str) -> Result<NetworkInterface> {
    pcap::Device::list()?
        .into_iter()
        .find(|d| d.name == interface_name)
        .map(NetworkInterface::from)
        .ok_or_else(|| FlowError::Config(format!("Interface '{interface_name}' not found")))
}

/// The device libpcap would pick on its own.
pub fn default_interface() -> Result<NetworkInterface> {
    pcap::Device::lookup()?
        .map(NetworkInterface::from)
        .ok_or(FlowError::NoDevice)
}
