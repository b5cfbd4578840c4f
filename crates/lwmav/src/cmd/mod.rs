use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use lwmav_frame::Dialect;
use lwmav_transport::{Baudrate, TransportParams};
use lwmav_vehicle::{Vehicle, VehicleConfig};
use tracing::info;

use crate::exit::{vehicle_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod arm;
pub mod home;
pub mod interval;
pub mod mode;
pub mod monitor;
pub mod request;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print received messages.
    Monitor(MonitorArgs),
    /// Fetch the vehicle's home position.
    Home,
    /// Arm the vehicle.
    Arm(ArmArgs),
    /// Disarm the vehicle.
    Disarm(ArmArgs),
    /// Switch ArduCopter flight mode.
    Mode(ModeArgs),
    /// Request one message and print it.
    Request(RequestArgs),
    /// Request a message at a fixed rate and print each arrival.
    Interval(IntervalArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, link: &LinkArgs, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Monitor(args) => monitor::run(args, link, format),
        Command::Home => home::run(link, format),
        Command::Arm(args) => arm::run(true, args, link, format),
        Command::Disarm(args) => arm::run(false, args, link, format),
        Command::Mode(args) => mode::run(args, link, format),
        Command::Request(args) => request::run(args, link, format),
        Command::Interval(args) => interval::run(args, link, format),
        Command::Version(args) => version::run(args),
    }
}

/// How to reach the vehicle. Exactly one link flag, or a config file
/// carrying a `transport` section.
#[derive(Args, Debug, Default)]
pub struct LinkArgs {
    /// Listen on a local UDP port; the first sender becomes the peer.
    #[arg(long, value_name = "PORT", global = true)]
    pub udp: Option<u16>,
    /// Send to a UDP endpoint.
    #[arg(long, value_name = "HOST:PORT", global = true)]
    pub udp_client: Option<String>,
    /// Connect to a TCP endpoint (e.g. SITL on 127.0.0.1:5760).
    #[arg(long, value_name = "HOST:PORT", global = true)]
    pub tcp: Option<String>,
    /// Open a serial device.
    #[arg(long, value_name = "DEVICE", global = true)]
    pub serial: Option<PathBuf>,
    /// Serial line rate.
    #[arg(long, value_name = "RATE", default_value_t = 57_600, global = true)]
    pub baud: u32,
    /// Vehicle configuration file (JSON).
    #[arg(long, value_name = "FILE", env = "LWMAV_CONFIG", global = true)]
    pub config: Option<PathBuf>,
    /// Remote system id.
    #[arg(long, value_name = "ID", global = true)]
    pub target_system: Option<u8>,
    /// Remote component id.
    #[arg(long, value_name = "ID", global = true)]
    pub target_component: Option<u8>,
    /// Acknowledgement timeout for commands (e.g. 2s, 500ms).
    #[arg(long, value_name = "DURATION", global = true)]
    pub timeout: Option<String>,
}

impl LinkArgs {
    fn flag_params(&self) -> CliResult<Option<TransportParams>> {
        let mut selected = Vec::new();
        if let Some(port) = self.udp {
            selected.push(TransportParams::Udp { port });
        }
        if let Some(addr) = &self.udp_client {
            let (host, port) = parse_host_port(addr)?;
            selected.push(TransportParams::UdpClient { host, port });
        }
        if let Some(addr) = &self.tcp {
            let (host, port) = parse_host_port(addr)?;
            selected.push(TransportParams::Tcp { host, port });
        }
        if let Some(device) = &self.serial {
            let baudrate = Baudrate::try_from(self.baud).map_err(CliError::usage)?;
            selected.push(TransportParams::Serial {
                device: device.clone(),
                baudrate,
            });
        }
        if selected.len() > 1 {
            return Err(CliError::usage(
                "choose one of --udp, --udp-client, --tcp, --serial",
            ));
        }
        Ok(selected.pop())
    }

    /// Effective configuration: file (if any), then flag overrides.
    pub fn config(&self) -> CliResult<VehicleConfig> {
        let mut config = match &self.config {
            Some(path) => VehicleConfig::load(path)
                .map_err(|err| vehicle_error(&format!("config {}", path.display()), err))?,
            None => VehicleConfig::default(),
        };
        if let Some(params) = self.flag_params()? {
            config.transport = Some(params);
        }
        if let Some(id) = self.target_system {
            config.target_system = id;
        }
        if let Some(id) = self.target_component {
            config.target_component = id;
        }
        if let Some(timeout) = &self.timeout {
            config.command_timeout_ms = parse_duration(timeout)?.as_millis() as u64;
        }
        config
            .validate()
            .map_err(|err| vehicle_error("invalid configuration", err))?;
        Ok(config)
    }

    pub fn open(&self) -> CliResult<Vehicle> {
        let config = self.config()?;
        let Some(params) = config.transport.clone() else {
            return Err(CliError::usage(
                "no link selected: pass --udp, --udp-client, --tcp, --serial or --config",
            ));
        };
        let mut vehicle = Vehicle::with_config(&config);
        vehicle
            .open(&params)
            .map_err(|err| vehicle_error("open failed", err))?;
        info!(transport = %params.kind(), "link open");
        Ok(vehicle)
    }
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Only print these message ids or names (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub msgid: Option<Vec<String>>,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ArmArgs {
    /// Bypass pre-arm (or landed) checks.
    #[arg(long)]
    pub force: bool,
    /// Send without waiting for the acknowledgement.
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Args, Debug)]
pub struct ModeArgs {
    /// Mode name (GUIDED, rtl, alt-hold, ...) or number.
    pub mode: String,
    /// Send without waiting for the acknowledgement.
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
    /// Message id or name (e.g. 33, GLOBAL_POSITION_INT).
    pub msgid: String,
}

#[derive(Args, Debug)]
pub struct IntervalArgs {
    /// Message id or name.
    pub msgid: String,
    /// Period between messages (e.g. 1s, 200ms).
    pub period: String,
    /// Exit after printing N messages.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_host_port(input: &str) -> CliResult<(String, u16)> {
    let (host, port) = input
        .rsplit_once(':')
        .ok_or_else(|| CliError::usage(format!("expected HOST:PORT, got {input:?}")))?;
    if host.is_empty() {
        return Err(CliError::usage(format!("missing host in {input:?}")));
    }
    let port = port
        .parse()
        .map_err(|_| CliError::usage(format!("invalid port in {input:?}")))?;
    Ok((host.to_string(), port))
}

/// Accepts a number or a (case-insensitive) message name.
pub fn parse_msgid(input: &str, dialect: &Dialect) -> CliResult<u32> {
    if let Ok(id) = input.parse::<u32>() {
        return Ok(id);
    }
    dialect
        .id_by_name(input)
        .ok_or_else(|| CliError::usage(format!("unknown message {input:?}")))
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
