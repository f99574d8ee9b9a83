//! Live capture through libpcap.
//!
//! Only available with the `capture` feature; without it every entry point
//! returns [`ConntrailError::CaptureUnavailable`] so the binary still builds
//! on hosts without libpcap headers.

use std::net::Ipv4Addr;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::InterfaceSelection;
use crate::error::Result;
use crate::packet::Packet;

/// BPF program applied to the capture: TCP for handshakes, DNS answers.
pub const CAPTURE_FILTER: &str = "tcp or (udp and src port 53)";

/// Interface chosen for capture and the local address used for direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInterface {
    pub name: String,
    pub address: Ipv4Addr,
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub snaplen: i32,
    pub promiscuous: bool,
    /// How long a read may block before the stop flag is checked again.
    pub read_timeout_ms: i32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self { snaplen: 1024, promiscuous: false, read_timeout_ms: 250 }
    }
}

#[cfg(feature = "capture")]
pub fn resolve_interface(selection: &InterfaceSelection) -> Result<HostInterface> {
    use crate::error::ConntrailError;
    use pcap::Device;
    use tracing::{debug, info};

    fn ipv4_of(device: &Device) -> Option<Ipv4Addr> {
        device.addresses.iter().find_map(|a| match a.addr {
            std::net::IpAddr::V4(v4) if !v4.is_unspecified() => Some(v4),
            _ => None,
        })
    }

    match selection {
        InterfaceSelection::Auto => {
            let preferred = Device::lookup()
                .map_err(|e| ConntrailError::Interface(format!("device lookup failed: {e}")))?;
            if let Some(device) = preferred {
                if let Some(address) = ipv4_of(&device) {
                    info!(interface = %device.name, %address, "auto-detected interface");
                    return Ok(HostInterface { name: device.name, address });
                }
                debug!(interface = %device.name, "default device has no IPv4 address");
            }

            let devices = Device::list()
                .map_err(|e| ConntrailError::Interface(format!("device list failed: {e}")))?;
            devices
                .into_iter()
                .filter(|d| d.flags.is_up() && d.flags.is_running() && !d.flags.is_loopback())
                .find_map(|d| ipv4_of(&d).map(|address| HostInterface { name: d.name, address }))
                .inspect(|iface| {
                    info!(interface = %iface.name, address = %iface.address, "auto-detected interface");
                })
                .ok_or_else(|| {
                    ConntrailError::Interface("no running interface with an IPv4 address".into())
                })
        }
        InterfaceSelection::Named(name) => {
            let devices = Device::list()
                .map_err(|e| ConntrailError::Interface(format!("device list failed: {e}")))?;
            let device = devices
                .into_iter()
                .find(|d| &d.name == name)
                .ok_or_else(|| ConntrailError::Interface(format!("interface {name} not found")))?;
            let address = ipv4_of(&device).ok_or_else(|| {
                ConntrailError::Interface(format!(
                    "unable to determine IPv4 address for interface {name}, try auto-detect"
                ))
            })?;
            info!(interface = %name, %address, "using interface");
            Ok(HostInterface { name: device.name, address })
        }
    }
}

#[cfg(not(feature = "capture"))]
pub fn resolve_interface(_selection: &InterfaceSelection) -> Result<HostInterface> {
    Err(crate::error::ConntrailError::CaptureUnavailable)
}

/// Open `interface` and forward decoded packets to `sender` from a dedicated
/// thread. The thread ends on cancellation, when the receiver goes away, or on
/// a fatal capture error; dropping `sender` then closes the engine's input.
#[cfg(feature = "capture")]
pub fn spawn_capture(
    interface: &HostInterface,
    settings: CaptureSettings,
    sender: mpsc::Sender<Packet>,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    use crate::decode::{decode, LinkLayer};
    use crate::error::ConntrailError;
    use pcap::Capture;
    use tracing::{debug, error, info, trace};

    let mut capture = Capture::from_device(interface.name.as_str())
        .map_err(|e| ConntrailError::Capture(format!("device open failed: {e}")))?
        .snaplen(settings.snaplen)
        .promisc(settings.promiscuous)
        .timeout(settings.read_timeout_ms)
        .immediate_mode(true)
        .open()
        .map_err(|e| ConntrailError::Capture(format!("capture open failed: {e}")))?;
    capture
        .filter(CAPTURE_FILTER, true)
        .map_err(|e| ConntrailError::Capture(format!("filter failed: {e}")))?;

    let datalink = capture.get_datalink();
    let link = LinkLayer::from_dlt(datalink.0)
        .map_err(|e| ConntrailError::Capture(e.to_string()))?;
    info!(interface = %interface.name, ?link, filter = CAPTURE_FILTER, "capture started");

    std::thread::Builder::new()
        .name("capture".into())
        .spawn(move || {
            while !cancel.is_cancelled() {
                match capture.next_packet() {
                    Ok(frame) => match decode(link, frame.data) {
                        Ok(packet) => {
                            if sender.blocking_send(packet).is_err() {
                                debug!("engine gone, stopping capture");
                                break;
                            }
                        }
                        Err(e) => trace!(error = %e, "dropping undecodable frame"),
                    },
                    Err(pcap::Error::TimeoutExpired) => continue,
                    Err(pcap::Error::NoMorePackets) => break,
                    Err(e) => {
                        error!(error = %e, "capture failed");
                        break;
                    }
                }
            }
            info!("capture stopped");
        })
        .map_err(ConntrailError::Io)
}

#[cfg(not(feature = "capture"))]
pub fn spawn_capture(
    _interface: &HostInterface,
    _settings: CaptureSettings,
    _sender: mpsc::Sender<Packet>,
    _cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    Err(crate::error::ConntrailError::CaptureUnavailable)
}
