use crate::capture::SessionOptions;
use crate::post_rotate::PostRotate;
use crate::schedule::RotationSchedule;
use crate::template::PathTemplate;
use crate::{NetdumpError, Result};
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SNAPLEN: u32 = 262144;

/// netdump - dump traffic on a network and write it to files rotated at exact times
#[derive(Parser, Debug, Default)]
#[command(name = "netdump", author, version, about, long_about = None)]
#[command(override_usage = "netdump [OPTIONS] [expression]...")]
pub struct Args {
    /// Print the list of network interfaces available for capture and exit
    #[arg(short = 'D', long = "list-interfaces")]
    pub list_interfaces: bool,

    /// Listen on interface
    #[arg(short, long, value_name = "interface")]
    pub interface: Option<String>,

    /// Write the raw packets to files named after this strftime template,
    /// e.g. dump_%Y%m%d_%H%M%S.pcap
    #[arg(short = 'w', value_name = "file_name")]
    pub file_name: Option<String>,

    /// Run "postrotate-command file" on every file closed by a rotation,
    /// e.g. -z gzip
    #[arg(short = 'z', value_name = "postrotate-command")]
    pub post_rotate: Option<String>,

    /// Six-field cron expression for switching to a new file,
    /// e.g. "0 */15 * * * *" for every 15 minutes
    #[arg(long, value_name = "time")]
    pub cron: Option<String>,

    /// Snarf snaplen bytes of data from each packet [default: 262144]
    #[arg(short = 's', long = "snapshot-length", value_name = "snaplen")]
    pub snaplen: Option<u32>,

    /// Put the interface into promiscuous mode
    #[arg(long)]
    pub promisc: bool,

    /// JSON config file; command-line options take precedence
    #[arg(short, long, value_name = "file")]
    pub config: Option<PathBuf>,

    /// Capture filter expression
    #[arg(value_name = "expression", trailing_var_arg = true)]
    pub expression: Vec<String>,
}

/// Settings read from a JSON config file. Every field is optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub interface: Option<String>,
    pub file_name: Option<String>,
    pub post_rotate: Option<String>,
    pub cron: Option<String>,
    pub snaplen: Option<u32>,
    pub promisc: Option<bool>,
    pub filter: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            NetdumpError::Config(format!("unable to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| NetdumpError::Config(format!("invalid config {}: {}", path.display(), e)))
    }
}

/// Merged configuration, not yet validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub interface: String,
    pub file_name: String,
    pub post_rotate: Option<String>,
    pub cron: String,
    pub snaplen: u32,
    pub promisc: bool,
    pub filter: Option<String>,
}

/// Everything needed to start capturing, validated up front.
#[derive(Debug)]
pub struct Plan {
    pub template: PathTemplate,
    pub schedule: RotationSchedule,
    pub post_rotate: Option<PostRotate>,
    pub session: SessionOptions,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(args, file))
    }

    pub fn merge(args: &Args, file: FileConfig) -> Self {
        let filter = if args.expression.is_empty() {
            file.filter
        } else {
            Some(args.expression.join(" "))
        };

        Self {
            interface: args.interface.clone().or(file.interface).unwrap_or_default(),
            file_name: args.file_name.clone().or(file.file_name).unwrap_or_default(),
            post_rotate: args.post_rotate.clone().or(file.post_rotate),
            cron: args.cron.clone().or(file.cron).unwrap_or_default(),
            snaplen: args.snaplen.or(file.snaplen).unwrap_or(DEFAULT_SNAPLEN),
            promisc: args.promisc || file.promisc.unwrap_or(false),
            filter: filter.filter(|f| !f.trim().is_empty()),
        }
    }

    /// Checks the file name template, the schedule and the postrotate
    /// command, in that order. Nothing is opened on failure.
    pub fn validate(&self) -> Result<Plan> {
        let template = PathTemplate::parse(&self.file_name)?;
        if self.cron.trim().is_empty() {
            return Err(NetdumpError::Config(
                "a rotation schedule must be specified with --cron".to_string(),
            ));
        }
        let schedule = RotationSchedule::parse(&self.cron)?;

        let post_rotate = self.post_rotate.as_deref().and_then(PostRotate::parse);
        if let Some(command) = &post_rotate {
            command.validate()?;
        }

        if self.interface.is_empty() {
            return Err(NetdumpError::Config(
                "an interface must be specified with -i".to_string(),
            ));
        }
        if self.snaplen == 0 {
            return Err(NetdumpError::Config(
                "snapshot length must be positive".to_string(),
            ));
        }

        Ok(Plan {
            template,
            schedule,
            post_rotate,
            session: SessionOptions {
                interface: self.interface.clone(),
                snaplen: self.snaplen,
                promisc: self.promisc,
                filter: self.filter.clone(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("netdump").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn parses_tcpdump_style_flags() {
        let args = args(&[
            "-i", "eth0", "-w", "dump_%Y%m%d_%H%M%S.pcap", "--cron", "0 */15 * * * *", "-z",
            "gzip", "tcp", "port", "80",
        ]);
        let config = Config::merge(&args, FileConfig::default());

        assert_eq!(config.interface, "eth0");
        assert_eq!(config.file_name, "dump_%Y%m%d_%H%M%S.pcap");
        assert_eq!(config.cron, "0 */15 * * * *");
        assert_eq!(config.post_rotate.as_deref(), Some("gzip"));
        assert_eq!(config.filter.as_deref(), Some("tcp port 80"));
        assert_eq!(config.snaplen, DEFAULT_SNAPLEN);
        assert!(!config.promisc);
    }

    #[test]
    fn command_line_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netdump.json");
        fs::write(
            &path,
            r#"{"interface": "eth1", "file_name": "f_%s.pcap", "cron": "@hourly", "snaplen": 1500, "filter": "udp"}"#,
        )
        .unwrap();

        let args = args(&["-c", path.to_str().unwrap(), "-i", "eth0"]);
        let config = Config::from_args(&args).unwrap();

        assert_eq!(config.interface, "eth0");
        assert_eq!(config.file_name, "f_%s.pcap");
        assert_eq!(config.cron, "@hourly");
        assert_eq!(config.snaplen, 1500);
        assert_eq!(config.filter.as_deref(), Some("udp"));
    }

    #[test]
    fn unknown_config_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"iface": "eth0"}"#).unwrap();
        assert!(matches!(
            FileConfig::load(&path),
            Err(NetdumpError::Config(_))
        ));
    }

    #[test]
    fn validation_checks_template_before_schedule() {
        let config = Config::merge(
            &args(&["-i", "eth0", "-w", "dump.pcap", "--cron", "nope"]),
            FileConfig::default(),
        );
        assert!(matches!(
            config.validate(),
            Err(NetdumpError::TemplateWithoutTimeFormat(_))
        ));
    }

    #[test]
    fn malformed_schedule_fails_validation() {
        let config = Config::merge(
            &args(&["-i", "eth0", "-w", "dump_%s.pcap", "--cron", "*/15 * * *"]),
            FileConfig::default(),
        );
        assert!(matches!(
            config.validate(),
            Err(NetdumpError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn missing_schedule_is_a_config_error() {
        let config = Config::merge(
            &args(&["-i", "eth0", "-w", "dump_%s.pcap"]),
            FileConfig::default(),
        );
        assert!(matches!(config.validate(), Err(NetdumpError::Config(_))));
    }

    #[test]
    fn missing_interface_fails_validation() {
        let config = Config::merge(
            &args(&["-w", "dump_%s.pcap", "--cron", "0 0 * * * *"]),
            FileConfig::default(),
        );
        assert!(matches!(config.validate(), Err(NetdumpError::Config(_))));
    }

    #[test]
    fn valid_configuration_yields_plan() {
        let config = Config::merge(
            &args(&[
                "-i", "lo", "-w", "dump_%s.pcap", "--cron", "0 0 * * * *", "-s", "96",
                "--promisc",
            ]),
            FileConfig::default(),
        );
        let plan = config.validate().unwrap();
        assert_eq!(plan.schedule.expression(), "0 0 * * * *");
        assert!(plan.post_rotate.is_none());
        assert_eq!(
            plan.session,
            SessionOptions {
                interface: "lo".to_string(),
                snaplen: 96,
                promisc: true,
                filter: None,
            }
        );
    }
}
