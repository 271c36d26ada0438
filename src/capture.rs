use crate::writer::{ActiveFile, RawPacket};
use crate::{NetdumpError, Result};
use log::{debug, error, info};
use pcap::{Active, Capture, Device};
use pcap_file::DataLink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Something that hands out captured packets one at a time.
pub trait PacketSource: Send {
    /// Blocks until the next packet is available.
    ///
    /// `pcap::Error::NoMorePackets` marks an exhausted source;
    /// `pcap::Error::TimeoutExpired` is retried by the caller.
    fn next_packet(&mut self) -> Result<RawPacket<'_>>;

    fn link_type(&self) -> DataLink;

    fn snaplen(&self) -> u32;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub interface: String,
    pub snaplen: u32,
    pub promisc: bool,
    pub filter: Option<String>,
}

/// Live capture on one interface.
pub struct CaptureSession {
    interface: String,
    snaplen: u32,
    cap: Capture<Active>,
}

impl CaptureSession {
    pub fn open(options: &SessionOptions) -> Result<Self> {
        let devices = Device::list()?;
        if !devices.iter().any(|d| d.name == options.interface) {
            return Err(NetdumpError::InvalidDevice(options.interface.clone()));
        }

        let mut cap = Capture::from_device(options.interface.as_str())?
            .snaplen(i32::try_from(options.snaplen).unwrap_or(i32::MAX))
            .promisc(options.promisc)
            .immediate_mode(true)
            .timeout(0)
            .open()?;

        if let Some(filter) = options.filter.as_deref() {
            info!("Using BPF filter {:?}", filter);
            cap.filter(filter, true)?;
        }

        info!(
            "Capturing on {} (link type {:?}, snaplen {})",
            options.interface,
            cap.get_datalink(),
            options.snaplen
        );

        Ok(Self {
            interface: options.interface.clone(),
            snaplen: options.snaplen,
            cap,
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl PacketSource for CaptureSession {
    fn next_packet(&mut self) -> Result<RawPacket<'_>> {
        let packet = self.cap.next_packet()?;
        Ok(RawPacket {
            timestamp: Duration::new(
                packet.header.ts.tv_sec as u64,
                packet.header.ts.tv_usec as u32 * 1_000,
            ),
            caplen: packet.header.caplen,
            orig_len: packet.header.len,
            data: packet.data,
        })
    }

    fn link_type(&self) -> DataLink {
        DataLink::from(self.cap.get_datalink().0 as u32)
    }

    fn snaplen(&self) -> u32 {
        self.snaplen
    }
}

/// Names and descriptions of the interfaces available for capture.
pub fn list_interfaces() -> Result<Vec<(String, String)>> {
    let devices = Device::list()?;
    Ok(devices
        .into_iter()
        .map(|d| (d.name, d.desc.unwrap_or_default()))
        .collect())
}

/// Counters shared between the capture loop and the controller.
#[derive(Debug, Default)]
pub struct CaptureStats {
    written: AtomicU64,
    write_errors: AtomicU64,
    read_errors: AtomicU64,
}

impl CaptureStats {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    pub fn read_errors(&self) -> u64 {
        self.read_errors.load(Ordering::Relaxed)
    }
}

/// Pulls packets from `source` and writes each one to the active file.
///
/// Read and write errors are logged and counted, never escalated. The loop
/// never rotates or closes the file itself and only returns once the source
/// reports `NoMorePackets`.
pub fn run_capture_loop<S: PacketSource + ?Sized>(
    source: &mut S,
    active: &ActiveFile,
    stats: &CaptureStats,
) {
    loop {
        match source.next_packet() {
            Ok(packet) => match active.write(&packet) {
                Ok(()) => {
                    let written = stats.written.fetch_add(1, Ordering::Relaxed) + 1;
                    if written % 1000 == 0 {
                        debug!("Captured total {} packets", written);
                    }
                }
                Err(e) => {
                    stats.write_errors.fetch_add(1, Ordering::Relaxed);
                    error!("Write packet error: {}", e);
                }
            },
            Err(NetdumpError::Pcap(pcap::Error::TimeoutExpired)) => continue,
            Err(NetdumpError::Pcap(pcap::Error::NoMorePackets)) => {
                info!("Capture source exhausted");
                return;
            }
            Err(e) => {
                stats.read_errors.fetch_add(1, Ordering::Relaxed);
                error!("Capture error: {}", e);
            }
        }
    }
}
