use crate::template::PathTemplate;
use crate::{NetdumpError, Result};
use log::{debug, warn};
use pcap_file::DataLink;
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use std::borrow::Cow;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One packet as handed over by the capture source.
#[derive(Debug, Clone, Copy)]
pub struct RawPacket<'a> {
    pub timestamp: Duration,
    pub caplen: u32,
    pub orig_len: u32,
    pub data: &'a [u8],
}

/// A capture file for a single rotation period.
///
/// The pcap header is written by [`OutputFile::create_at`] before any record.
/// [`OutputFile::finalize`] consumes the file, so nothing can be written to it
/// afterwards.
pub struct OutputFile {
    path: PathBuf,
    writer: PcapWriter<BufWriter<File>>,
    packets: u64,
}

impl OutputFile {
    /// Renders `template` with the current time and creates that file.
    pub fn create(template: &PathTemplate, datalink: DataLink, snaplen: u32) -> Result<Self> {
        let path = template.render_now()?;
        Self::create_at(path, datalink, snaplen)
    }

    pub fn create_at(path: PathBuf, datalink: DataLink, snaplen: u32) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| NetdumpError::FileCreation {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let file = File::create(&path).map_err(|source| NetdumpError::FileCreation {
            path: path.clone(),
            source,
        })?;

        let header = PcapHeader {
            snaplen,
            datalink,
            ..Default::default()
        };
        let writer = write_header(&path, BufWriter::new(file), header)?;
        debug!("Created capture file {}", path.display());

        Ok(Self {
            path,
            writer,
            packets: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records written so far.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Appends one record header plus payload. Contents are not inspected.
    pub fn write_record(&mut self, packet: &RawPacket<'_>) -> Result<()> {
        let captured = packet.data.len().min(packet.caplen as usize);
        let data = &packet.data[..captured];
        let record = PcapPacket {
            timestamp: packet.timestamp,
            orig_len: packet.orig_len.max(captured as u32),
            data: Cow::Borrowed(data),
        };

        self.writer
            .write_packet(&record)
            .map_err(|e| NetdumpError::PcapFile(e.to_string()))?;
        self.packets += 1;
        Ok(())
    }

    /// Flushes buffered records and closes the file.
    pub fn finalize(self) -> Result<()> {
        let mut buffered = self.writer.into_writer();
        buffered.flush()?;
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }
}

/// Writes and flushes the pcap header into `sink`, which backs the file at
/// `path`. The file is removed if either step fails.
fn write_header<W: Write>(path: &Path, sink: W, header: PcapHeader) -> Result<PcapWriter<W>> {
    let written = PcapWriter::with_header(sink, header)
        .map_err(|e| NetdumpError::PcapFile(e.to_string()))
        .and_then(|mut writer| {
            writer
                .flush()
                .map_err(|e| NetdumpError::PcapFile(e.to_string()))?;
            Ok(writer)
        });

    if written.is_err() {
        if let Err(remove_err) = fs::remove_file(path) {
            warn!(
                "Failed to remove incomplete file {}: {}",
                path.display(),
                remove_err
            );
        }
    }
    written
}

/// The lock-guarded slot holding the file packets are currently written to.
///
/// The capture loop only writes through the slot; the controller is the only
/// party that swaps or empties it. An empty slot means capture has been
/// drained and late packets are dropped.
#[derive(Clone)]
pub struct ActiveFile {
    slot: Arc<Mutex<Option<OutputFile>>>,
}

impl ActiveFile {
    pub fn new(file: OutputFile) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(file))),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Option<OutputFile>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self, packet: &RawPacket<'_>) -> Result<()> {
        match self.lock().as_mut() {
            Some(file) => file.write_record(packet),
            None => Err(NetdumpError::FileClosed),
        }
    }

    pub fn current_path(&self) -> Option<PathBuf> {
        self.lock().as_ref().map(|file| file.path().to_path_buf())
    }
}
