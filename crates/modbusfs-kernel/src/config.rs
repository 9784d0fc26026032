//! Transport and startup configuration.
//!
//! Two sources feed the same types: the device specification given on the
//! command line (`rtu:/dev/ttyUSB0,115200,8N1`, `tcp:plc.local:502`) and an
//! optional TOML file that can also preload exports:
//!
//! ```toml
//! response_timeout_ms = 500
//!
//! [transport]
//! kind = "rtu"
//! device = "/dev/ttyUSB0"
//! baud = 115200
//! parity = "none"
//!
//! [[slave]]
//! address = 17
//! mode = "0755"
//!   [[slave.register]]
//!   index = 5
//!   mode = "0644"
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default serial device.
pub const DEFAULT_DEVICE: &str = "/dev/ttyUSB0";

/// Default serial line speed.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default Modbus-TCP port.
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Default bound on a single request/response exchange.
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 500;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid device specification {spec:?}: {reason}")]
    InvalidDevice { spec: String, reason: String },

    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    fn device(spec: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDevice {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}

/// Serial parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl Parity {
    fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'N' => Some(Parity::None),
            'E' => Some(Parity::Even),
            'O' => Some(Parity::Odd),
            _ => None,
        }
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(p: Parity) -> Self {
        match p {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Modbus RTU over a serial line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RtuConfig {
    pub device: String,
    pub baud: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_DEVICE.to_string(),
            baud: DEFAULT_BAUD,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
        }
    }
}

impl RtuConfig {
    pub fn data_bits(&self) -> Result<tokio_serial::DataBits, ConfigError> {
        match self.data_bits {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            n => Err(ConfigError::device(&self.device, format!("unsupported data bits {n}"))),
        }
    }

    pub fn stop_bits(&self) -> Result<tokio_serial::StopBits, ConfigError> {
        match self.stop_bits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            n => Err(ConfigError::device(&self.device, format!("unsupported stop bits {n}"))),
        }
    }
}

/// Modbus TCP to a single gateway or device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpConfig {
    pub host: String,
    #[serde(default = "default_tcp_port")]
    pub port: u16,
}

fn default_tcp_port() -> u16 {
    DEFAULT_TCP_PORT
}

/// The one link all register traffic goes through.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    Rtu(RtuConfig),
    Tcp(TcpConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Rtu(RtuConfig::default())
    }
}

impl std::fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportConfig::Rtu(rtu) => {
                let parity = match rtu.parity {
                    Parity::None => 'N',
                    Parity::Even => 'E',
                    Parity::Odd => 'O',
                };
                write!(
                    f,
                    "rtu:{},{},{}{}{}",
                    rtu.device, rtu.baud, rtu.data_bits, parity, rtu.stop_bits
                )
            }
            TransportConfig::Tcp(tcp) => write!(f, "tcp:{}:{}", tcp.host, tcp.port),
        }
    }
}

/// Parse `rtu[:<ttydev>[,<baud>[,<bits><parity><stop>]]]` or
/// `tcp:<host>[:<port>]`.
impl FromStr for TransportConfig {
    type Err = ConfigError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = match spec.split_once(':') {
            Some((kind, rest)) => (kind, Some(rest)),
            None => (spec, None),
        };
        match kind {
            "rtu" => parse_rtu(spec, rest).map(TransportConfig::Rtu),
            "tcp" => parse_tcp(spec, rest).map(TransportConfig::Tcp),
            other => Err(ConfigError::device(spec, format!("unknown transport {other:?}"))),
        }
    }
}

fn parse_rtu(spec: &str, rest: Option<&str>) -> Result<RtuConfig, ConfigError> {
    let mut rtu = RtuConfig::default();
    let Some(rest) = rest else {
        return Ok(rtu);
    };

    let mut fields = rest.split(',');
    if let Some(device) = fields.next().filter(|d| !d.is_empty()) {
        rtu.device = device.to_string();
    }
    if let Some(baud) = fields.next() {
        rtu.baud = baud
            .parse()
            .map_err(|_| ConfigError::device(spec, format!("bad baud rate {baud:?}")))?;
    }
    if let Some(frame) = fields.next() {
        let chars: Vec<char> = frame.chars().collect();
        let [bits, parity, stop] = chars.as_slice() else {
            return Err(ConfigError::device(spec, format!("bad frame format {frame:?}")));
        };
        rtu.data_bits = bits
            .to_digit(10)
            .and_then(|d| u8::try_from(d).ok())
            .ok_or_else(|| ConfigError::device(spec, format!("bad data bits {bits:?}")))?;
        rtu.parity = Parity::from_letter(*parity)
            .ok_or_else(|| ConfigError::device(spec, format!("bad parity {parity:?}")))?;
        rtu.stop_bits = stop
            .to_digit(10)
            .and_then(|d| u8::try_from(d).ok())
            .ok_or_else(|| ConfigError::device(spec, format!("bad stop bits {stop:?}")))?;
    }
    if fields.next().is_some() {
        return Err(ConfigError::device(spec, "trailing fields"));
    }

    rtu.data_bits()?;
    rtu.stop_bits()?;
    Ok(rtu)
}

fn parse_tcp(spec: &str, rest: Option<&str>) -> Result<TcpConfig, ConfigError> {
    let rest = rest
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ConfigError::device(spec, "missing host"))?;
    match rest.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => Ok(TcpConfig {
            host: host.to_string(),
            port: port
                .parse()
                .map_err(|_| ConfigError::device(spec, format!("bad port {port:?}")))?,
        }),
        Some(_) => Err(ConfigError::device(spec, "missing host")),
        None => Ok(TcpConfig {
            host: rest.to_string(),
            port: DEFAULT_TCP_PORT,
        }),
    }
}

/// A slave declared at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlaveExport {
    pub address: u32,
    /// Octal permission string, as written to the exports file.
    pub mode: String,
    #[serde(default, rename = "register")]
    pub registers: Vec<RegisterExport>,
}

/// A register declared at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterExport {
    pub index: u32,
    pub mode: String,
}

/// Contents of the optional config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub transport: Option<TransportConfig>,
    /// Per-transaction response bound; 0 disables it.
    pub response_timeout_ms: u64,
    #[serde(rename = "slave")]
    pub slaves: Vec<SlaveExport>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: None,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            slaves: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn response_timeout(&self) -> Option<Duration> {
        (self.response_timeout_ms > 0).then(|| Duration::from_millis(self.response_timeout_ms))
    }
}
