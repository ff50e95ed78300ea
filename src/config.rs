use clap::Parser;
use serde::Deserialize;
use std::{fs::read_to_string, net::SocketAddr};

/// SDN controller connection settings.
///
/// The controller exposes its config/operational RESTCONF stores (spec.md
/// §4.2, §6) behind a single static credential.
#[derive(Deserialize, Debug)]
pub struct Controller {
    /// base address of the SDN controller, e.g. `http://127.0.0.1:8181`.
    #[serde(default = "Controller::addr")]
    pub ctrlr_ip_addr: String,

    #[serde(default = "Controller::username")]
    pub username: String,

    #[serde(default = "Controller::password")]
    pub password: String,

    /// yang module header used to address the network-topology/inventory
    /// RESTCONF roots; kept configurable because it varies across
    /// controller releases.
    #[serde(default = "Controller::yang_json_header")]
    pub yang_json_header: String,

    /// bound on the confirmation poll (spec.md §9): a write that is not
    /// observed within this many attempts surfaces as
    /// `PartialAllocationFault` instead of looping forever.
    #[serde(default = "Controller::max_confirm_attempts")]
    pub max_confirm_attempts: u32,

    #[serde(default = "Controller::confirm_backoff_ms")]
    pub confirm_backoff_ms: u64,
}

impl Controller {
    fn addr() -> String {
        "http://127.0.0.1:8181".to_string()
    }

    fn username() -> String {
        "admin".to_string()
    }

    fn password() -> String {
        "admin".to_string()
    }

    fn yang_json_header() -> String {
        "application/yang.data+json".to_string()
    }

    fn max_confirm_attempts() -> u32 {
        20
    }

    fn confirm_backoff_ms() -> u64 {
        100
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            ctrlr_ip_addr: Self::addr(),
            username: Self::username(),
            password: Self::password(),
            yang_json_header: Self::yang_json_header(),
            max_confirm_attempts: Self::max_confirm_attempts(),
            confirm_backoff_ms: Self::confirm_backoff_ms(),
        }
    }
}

/// The three fixed TCP request servers (spec.md §6) plus the optional
/// telemetry listener.
#[derive(Deserialize, Debug)]
pub struct Servers {
    #[serde(default = "Servers::greeting")]
    pub greeting: SocketAddr,

    #[serde(default = "Servers::allocation")]
    pub allocation: SocketAddr,

    #[serde(default = "Servers::shutdown")]
    pub shutdown: SocketAddr,

    #[serde(default)]
    pub telemetry_enabled: bool,

    #[serde(default = "Servers::telemetry")]
    pub telemetry: SocketAddr,
}

impl Servers {
    fn greeting() -> SocketAddr {
        "0.0.0.0:65433".parse().unwrap()
    }

    fn allocation() -> SocketAddr {
        "0.0.0.0:65434".parse().unwrap()
    }

    fn shutdown() -> SocketAddr {
        "0.0.0.0:65435".parse().unwrap()
    }

    fn telemetry() -> SocketAddr {
        "0.0.0.0:65432".parse().unwrap()
    }
}

impl Default for Servers {
    fn default() -> Self {
        Self {
            greeting: Self::greeting(),
            allocation: Self::allocation(),
            shutdown: Self::shutdown(),
            telemetry_enabled: false,
            telemetry: Self::telemetry(),
        }
    }
}

/// Periodic poller target intervals (spec.md §4.9), each in milliseconds.
#[derive(Deserialize, Debug)]
pub struct Pollers {
    #[serde(default = "Pollers::topology_refresh_ms")]
    pub topology_refresh_ms: u64,

    #[serde(default = "Pollers::link_utilization_ms")]
    pub link_utilization_ms: u64,

    #[serde(default = "Pollers::deferred_greeting_ms")]
    pub deferred_greeting_ms: u64,
}

impl Pollers {
    fn topology_refresh_ms() -> u64 {
        10_000
    }

    fn link_utilization_ms() -> u64 {
        10_000
    }

    fn deferred_greeting_ms() -> u64 {
        5_000
    }
}

impl Default for Pollers {
    fn default() -> Self {
        Self {
            topology_refresh_ms: Self::topology_refresh_ms(),
            link_utilization_ms: Self::link_utilization_ms(),
            deferred_greeting_ms: Self::deferred_greeting_ms(),
        }
    }
}

/// Container orchestrator daemon connection settings (spec.md §4.7, §6).
#[derive(Deserialize, Debug)]
pub struct Orchestrator {
    /// Base URL of the orchestrator daemon's API.
    #[serde(default = "Orchestrator::local_socket")]
    pub local_socket: String,

    #[serde(default = "Orchestrator::port_range_start")]
    pub port_range_start: u16,

    #[serde(default = "Orchestrator::port_range_end")]
    pub port_range_end: u16,
}

impl Orchestrator {
    fn local_socket() -> String {
        "http://127.0.0.1:2375".to_string()
    }

    fn port_range_start() -> u16 {
        1024
    }

    fn port_range_end() -> u16 {
        10_000
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self {
            local_socket: Self::local_socket(),
            port_range_start: Self::port_range_start(),
            port_range_end: Self::port_range_end(),
        }
    }
}

#[derive(Deserialize, Debug)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub controller: Controller,
    #[serde(default)]
    pub servers: Servers,
    #[serde(default)]
    pub pollers: Pollers,
    #[serde(default)]
    pub orchestrator: Orchestrator,
    #[serde(default)]
    pub log: Log,

    /// Per-port-speed-independent baseline reservation installed on every
    /// switch port at init time (spec.md §3, "open link capacity").
    #[serde(default = "Config::open_link_capacity_bps")]
    pub open_link_capacity_bps: u64,
}

impl Config {
    fn open_link_capacity_bps() -> u64 {
        100_000_000
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller: Controller::default(),
            servers: Servers::default(),
            pollers: Pollers::default(),
            orchestrator: Orchestrator::default(),
            log: Log::default(),
            open_link_capacity_bps: Self::open_link_capacity_bps(),
        }
    }
}

#[derive(Parser)]
#[command(
    about = env!("CARGO_PKG_DESCRIPTION"),
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    /// path to the controller's configuration file (defaults to
    /// `fdk_conf.json` in the working directory).
    #[arg(long)]
    config: Option<String>,
}

impl Config {
    /// Load configuration from `--config <path>` (or `fdk_conf.json` in the
    /// working directory if it exists), falling back to defaults for
    /// anything the file omits.
    pub fn load() -> anyhow::Result<Self> {
        let path = Cli::parse().config.unwrap_or_else(|| "fdk_conf.json".to_string());

        let cfg_str = match read_to_string(&path) {
            Ok(s) => s,
            Err(_) => return Ok(Self::default()),
        };

        serde_json5::from_str(&cfg_str)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path, e))
    }
}
