//! Continuous packet capture into capture files rotated on a cron schedule.
//!
//! A [`CaptureSession`] feeds [`run_capture_loop`], which appends every packet
//! to whichever [`OutputFile`] currently sits in the shared [`ActiveFile`]
//! slot. The [`Controller`] owns that slot: it swaps in a fresh file on every
//! [`RotationTrigger`] event, finalizes the old one and hands it to the
//! [`PostRotator`], and drains everything on the termination signal.

use std::path::PathBuf;
use thiserror::Error;

pub mod capture;
pub mod config;
pub mod control;
pub mod post_rotate;
pub mod schedule;
pub mod signal;
pub mod template;
pub mod writer;

pub use capture::{
    CaptureSession, CaptureStats, PacketSource, SessionOptions, list_interfaces, run_capture_loop,
};
pub use config::{Args, Config, FileConfig, Plan};
pub use control::{ControlState, Controller};
pub use post_rotate::{PostRotate, PostRotator};
pub use schedule::{RotationSchedule, RotationTrigger};
pub use template::PathTemplate;
pub use writer::{ActiveFile, OutputFile, RawPacket};

#[derive(Error, Debug)]
pub enum NetdumpError {
    #[error("Pcap error: {0}")]
    Pcap(#[from] pcap::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid device name: {0}")]
    InvalidDevice(String),

    #[error("Invalid file name template {template:?}: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("File name {0:?} must include a strftime time format, e.g. dump_%Y%m%d_%H%M%S.pcap")]
    TemplateWithoutTimeFormat(String),

    #[error("Invalid cron format {expr:?}: {reason}")]
    InvalidSchedule { expr: String, reason: String },

    #[error("Postrotate command {command:?} error: {reason}")]
    PostRotate { command: String, reason: String },

    #[error("Unable to create file {path}: {source}")]
    FileCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pcap file error: {0}")]
    PcapFile(String),

    #[error("No output file is active")]
    FileClosed,

    #[error("Signal handler error: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = NetdumpError> = std::result::Result<T, E>;
