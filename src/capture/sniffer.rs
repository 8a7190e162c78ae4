use crossbeam_channel::{Sender, TrySendError};
use etherparse::{LaxPacketHeaders, LaxPayloadSlice, NetHeaders, TransportHeader};
use pcap::{Activated, Active, Capture, Linktype, Offline, PacketHeader};
use std::error::Error;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{atomic::{AtomicBool, Ordering}, Arc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, trace};

use crate::config::{CaptureConfig, TimestampSource};
use crate::error::{FlowError, Result};

/// Network-layer fields of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkHeader {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub protocol: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPacket {
    /// Seconds, in the unit chosen by [`TimestampSource`].
    pub timestamp: f64,
    /// On-wire length in bytes.
    pub packet_len: u32,
    /// `None` when the frame carries no IPv4/IPv6 header.
    pub network: Option<NetworkHeader>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

impl ParsedPacket {
    pub fn ip(
        src_ip: IpAddr,
        src_port: u16,
        dst_ip: IpAddr,
        dst_port: u16,
        protocol: u8,
        packet_len: u32,
        timestamp: f64,
    ) -> Self {
        Self {
            timestamp,
            packet_len,
            network: Some(NetworkHeader { src_ip, dst_ip, protocol }),
            src_port: Some(src_port),
            dst_port: Some(dst_port),
        }
    }

    /// A frame without a network layer (ARP, LLDP, ...).
    pub fn non_ip(packet_len: u32, timestamp: f64) -> Self {
        Self { timestamp, packet_len, network: None, src_port: None, dst_port: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    RawIp,
    LinuxSll,
}

impl LinkLayer {
    pub fn from_linktype(linktype: Linktype) -> Option<Self> {
        match linktype.0 {
            1 => Some(LinkLayer::Ethernet),
            // DLT_RAW (12, 14 on OpenBSD), LINKTYPE_RAW, LINKTYPE_IPV4, LINKTYPE_IPV6
            12 | 14 | 101 | 228 | 229 => Some(LinkLayer::RawIp),
            113 => Some(LinkLayer::LinuxSll),
            _ => None,
        }
    }
}

const SLL_HEADER_LEN: usize = 16;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;

/// Decodes one captured frame.
///
/// Parsing is lax below the IP header: a payload cut short by the snap length
/// or a broken transport header still yields the addresses, with the ports
/// left unset. Frames that decode but carry no IP header come back with
/// `network: None`; only frames whose IP header cannot be recovered are errors.
pub fn parse_frame(link: LinkLayer, data: &[u8], timestamp: f64, packet_len: u32) -> std::result::Result<ParsedPacket, Box<dyn Error>> {
    let parsed = match link {
        LinkLayer::Ethernet => LaxPacketHeaders::from_ethernet(data)
            .map_err(|e| format!("Failed to parse packet: {e}"))?,
        LinkLayer::RawIp => LaxPacketHeaders::from_ip(data)
            .map_err(|e| format!("Failed to parse packet: {e}"))?,
        LinkLayer::LinuxSll => {
            if data.len() < SLL_HEADER_LEN {
                return Err("Truncated Linux cooked header".into());
            }
            let protocol = u16::from_be_bytes([data[14], data[15]]);
            if protocol != ETHERTYPE_IPV4 && protocol != ETHERTYPE_IPV6 {
                return Ok(ParsedPacket::non_ip(packet_len, timestamp));
            }
            LaxPacketHeaders::from_ip(&data[SLL_HEADER_LEN..])
                .map_err(|e| format!("Failed to parse packet: {e}"))?
        }
    };

    let (src_ip, dst_ip, header_protocol) = match &parsed.net {
        Some(NetHeaders::Ipv4(ipv4, _)) => (
            IpAddr::from(ipv4.source),
            IpAddr::from(ipv4.destination),
            ipv4.protocol.0,
        ),
        Some(NetHeaders::Ipv6(ipv6, _)) => (
            IpAddr::from(ipv6.source),
            IpAddr::from(ipv6.destination),
            ipv6.next_header.0,
        ),
        _ => {
            // an IP ethertype whose header did not survive parsing
            if let Some((err, layer)) = &parsed.stop_err {
                return Err(format!("Failed to parse packet at {layer}: {err}").into());
            }
            return Ok(ParsedPacket::non_ip(packet_len, timestamp));
        }
    };

    // Upper-layer protocol after any IPv6 extension headers
    let ip_protocol = match &parsed.payload {
        LaxPayloadSlice::Ip(payload) => payload.ip_number.0,
        _ => header_protocol,
    };

    let (src_port, dst_port, protocol) = match &parsed.transport {
        Some(TransportHeader::Tcp(tcp)) => (Some(tcp.source_port), Some(tcp.destination_port), 6),
        Some(TransportHeader::Udp(udp)) => (Some(udp.source_port), Some(udp.destination_port), 17),
        Some(TransportHeader::Icmpv4(_)) => (None, None, 1),
        Some(TransportHeader::Icmpv6(_)) => (None, None, 58),
        _ => (None, None, ip_protocol),
    };

    if let Some((err, layer)) = &parsed.stop_err {
        trace!(%src_ip, %dst_ip, "Partial decode, stopped at {layer}: {err}");
    }

    Ok(ParsedPacket {
        timestamp,
        packet_len,
        network: Some(NetworkHeader { src_ip, dst_ip, protocol }),
        src_port,
        dst_port,
    })
}

#[inline]
fn capture_seconds(header: &PacketHeader) -> f64 {
    header.ts.tv_sec as f64 + header.ts.tv_usec as f64 / 1_000_000.0
}

#[inline]
fn wall_clock_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Counters reported when the capture thread exits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnifferStats {
    pub received: u64,
    pub malformed: u64,
    pub queue_full: u64,
}

enum CaptureSource {
    Live(Capture<Active>),
    Offline(Capture<Offline>),
}

struct CaptureContext {
    link: LinkLayer,
    timestamps: TimestampSource,
    running: Arc<AtomicBool>,
    sender: Sender<ParsedPacket>,
    // a live source drops on a full queue instead of stalling libpcap
    lossy: bool,
}

pub struct PacketSniffer {
    sniffer_running: Arc<AtomicBool>,
    sniffer_thread: Option<JoinHandle<Result<SnifferStats>>>,
    capture: Option<(CaptureSource, LinkLayer)>,      // owned until start, then moved into thread
    packet_sender: Option<Sender<ParsedPacket>>,     // moved into the thread on start
    timestamps: TimestampSource,
}

impl PacketSniffer {
    pub fn new_with_sender(sender: Sender<ParsedPacket>) -> Self {
        Self {
            sniffer_running: Arc::new(AtomicBool::new(false)),
            sniffer_thread: None,
            capture: None,
            packet_sender: Some(sender),
            timestamps: TimestampSource::Capture,
        }
    }

    pub fn init_sniffer(&mut self, interface: &str, config: &CaptureConfig) -> Result<()> {
        let mut cap = Capture::from_device(interface)?
            .promisc(config.promisc)
            .snaplen(config.snaplen)
            .immediate_mode(true)
            .timeout(config.timeout_ms)
            .open()?;

        if !config.filter.is_empty() {
            cap.filter(&config.filter, true)?;
        }
        let link = Self::link_layer(cap.get_datalink())?;
        info!(interface, filter = %config.filter, ?link, "Interface successfully opened");

        self.capture = Some((CaptureSource::Live(cap), link));
        self.timestamps = config.timestamps;
        Ok(())
    }

    pub fn init_offline(&mut self, path: &Path, config: &CaptureConfig) -> Result<()> {
        let mut cap = Capture::from_file(path)?;

        if !config.filter.is_empty() {
            cap.filter(&config.filter, true)?;
        }
        let link = Self::link_layer(cap.get_datalink())?;
        info!(file = %path.display(), filter = %config.filter, ?link, "Capture file successfully opened");

        self.capture = Some((CaptureSource::Offline(cap), link));
        self.timestamps = config.timestamps;
        Ok(())
    }

    fn link_layer(linktype: Linktype) -> Result<LinkLayer> {
        LinkLayer::from_linktype(linktype).ok_or(FlowError::UnsupportedLinkType(linktype.0))
    }

    pub fn start_sniffer(&mut self) -> Result<()> {
        let (source, link) = self
            .capture
            .take()
            .ok_or(FlowError::CaptureClosed)?;

        let sender = self.packet_sender.take().ok_or(FlowError::AlreadyRunning("Sniffer"))?;
        if self.sniffer_running.swap(true, Ordering::Relaxed) {
            return Err(FlowError::AlreadyRunning("Sniffer"));
        }

        let mut ctx = CaptureContext {
            link,
            timestamps: self.timestamps,
            running: self.sniffer_running.clone(),
            sender,
            lossy: false,
        };

        let handle = match source {
            CaptureSource::Live(cap) => {
                let cap = match cap.setnonblock() {
                    Ok(cap) => cap,
                    Err(e) => {
                        self.sniffer_running.store(false, Ordering::Relaxed);
                        return Err(e.into());
                    }
                };
                ctx.lossy = true;
                thread::spawn(move || Self::capture_loop(cap, ctx))
            }
            CaptureSource::Offline(cap) => thread::spawn(move || Self::capture_loop(cap, ctx)),
        };

        self.sniffer_thread = Some(handle);
        Ok(())
    }

    /// True once the capture thread has exited on its own, e.g. at the end of a capture file.
    pub fn is_finished(&self) -> bool {
        self.sniffer_thread.as_ref().map_or(false, |h| h.is_finished())
    }

    /// Stops the capture thread and returns its counters; a capture failure
    /// that ended the thread early surfaces here instead.
    pub fn stop_sniffer(&mut self) -> Result<SnifferStats> {
        self.sniffer_running.store(false, Ordering::Relaxed);

        // If start succeeded, capture and sender are already moved. If not, drop them now.
        self.capture = None;
        self.packet_sender = None;

        let Some(handle) = self.sniffer_thread.take() else {
            return Ok(SnifferStats::default());
        };
        let stats = handle.join().map_err(|_| FlowError::ThreadPanicked("Sniffer"))??;
        info!(
            received = stats.received,
            malformed = stats.malformed,
            queue_full = stats.queue_full,
            "Sniffer stopped"
        );
        Ok(stats)
    }

    fn capture_loop<T: Activated + ?Sized>(mut cap: Capture<T>, ctx: CaptureContext) -> Result<SnifferStats> {
        debug!("Sniffer thread started");
        let mut stats = SnifferStats::default();

        while ctx.running.load(Ordering::Relaxed) {
            match cap.next_packet() {
                Ok(packet) => {
                    if !Self::packet_handler(packet.header, packet.data, &ctx, &mut stats) {
                        debug!("Packet receiver dropped, stopping capture");
                        break;
                    }
                }
                Err(pcap::Error::TimeoutExpired) => {
                    thread::sleep(Duration::from_millis(1));
                }
                Err(pcap::Error::NoMorePackets) => {
                    info!("Capture file exhausted");
                    break;
                }
                Err(e) => {
                    error!("Error capturing packet: {e}");
                    return Err(e.into());
                }
            }
        }

        debug!("Sniffer thread exiting");
        Ok(stats)
        // cap and the sender drop here, which closes the engine's queue
    }

    /// Returns `false` once the engine side of the queue is gone.
    fn packet_handler(header: &PacketHeader, packet_data: &[u8], ctx: &CaptureContext, stats: &mut SnifferStats) -> bool {
        stats.received += 1;

        let timestamp = match ctx.timestamps {
            TimestampSource::Capture => capture_seconds(header),
            TimestampSource::Arrival => wall_clock_seconds(),
        };

        let parsed_packet = match parse_frame(ctx.link, packet_data, timestamp, header.len) {
            Ok(p) => p,
            Err(e) => {
                stats.malformed += 1;
                trace!("Dropping malformed frame: {e}");
                return true;
            }
        };

        Self::forward(parsed_packet, ctx, stats)
    }

    /// Queues one packet for the engine. Returns `false` once the engine side is gone.
    fn forward(packet: ParsedPacket, ctx: &CaptureContext, stats: &mut SnifferStats) -> bool {
        if ctx.lossy {
            match ctx.sender.try_send(packet) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    stats.queue_full += 1;
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        } else {
            ctx.sender.send(packet).is_ok()
        }
    }
}
