use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The baud rate used when a connect request does not name one.
pub const DEFAULT_BAUD: u32 = 9600;

/// An external monitor program, spawned once per session.
///
/// Its arguments may use the placeholders `{port}` and `{baud}`,
/// which are filled in from the connect request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorCommand {
    /// The program to run.
    pub program: String,

    /// The arguments, possibly with placeholders.
    pub args: Vec<String>,

    /// Whether the process reads its stdin and puts it on the wire.
    /// If not, writes are accepted but dropped.
    pub forward_input: bool,
}

impl MonitorCommand {
    pub(crate) fn render_args(&self, port: &str, baud: u32) -> Vec<String> {
        let baud = baud.to_string();

        self.args
            .iter()
            .map(|arg| arg.replace("{port}", port).replace("{baud}", &baud))
            .collect()
    }
}

impl Default for MonitorCommand {
    fn default() -> Self {
        Self {
            program: "arduino-cli".into(),
            args: ["monitor", "--port", "{port}", "--config", "baudrate={baud}"]
                .into_iter()
                .map(Into::into)
                .collect(),
            forward_input: true,
        }
    }
}

/// How the bridge reaches the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TransportMode {
    /// Open the serial port ourselves.
    #[default]
    DirectSerial,

    /// Let a monitor process do it.
    SpawnedProcess(MonitorCommand),
}

/// Where the board toolchain lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolchainConfig {
    /// The toolchain executable.
    pub program: String,

    /// Put in front of `PATH` when running the toolchain.
    pub bin_dir: Option<PathBuf>,

    /// Used as `HOME` when running the toolchain.
    pub home: Option<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            program: "arduino-cli".into(),
            bin_dir: None,
            home: None,
        }
    }
}

/// The configuration used for running the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// How the device is reached.
    pub transport: TransportMode,

    /// How often a directly opened port is drained, in milliseconds.
    pub poll_interval_ms: u64,

    /// Baud rate for connect requests which do not say.
    pub default_baud: u32,

    /// The board toolchain.
    pub toolchain: ToolchainConfig,

    /// Where sketches are stored.
    pub workspace: PathBuf,

    /// If set, logs are also written to daily files in this directory.
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportMode::default(),
            poll_interval_ms: 10,
            default_baud: DEFAULT_BAUD,
            toolchain: ToolchainConfig::default(),
            workspace: std::env::temp_dir().join("arduino_workspace"),
            log_dir: None,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            transport: TransportMode::SpawnedProcess(MonitorCommand::default()),
            toolchain: ToolchainConfig {
                program: "arduino-cli".into(),
                bin_dir: Some("/opt/arduino/bin".into()),
                home: Some("/var/lib/serial-bridge".into()),
            },
            workspace: "/var/lib/serial-bridge/workspace".into(),
            log_dir: Some("/var/log/serial-bridge".into()),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let p = p.as_ref();
        let s = std::fs::read_to_string(p)
            .map_err(|e| Error::BadConfig(format!("Could not read {p:?}: {e}")))?;

        Self::deserialize(&s)
    }

    /// The poll tick for directly opened ports.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Check the invariants a configuration file can't express.
    pub fn validate(&self) -> Result<(), Error> {
        if self.poll_interval_ms == 0 {
            return Err(Error::BadConfig(
                "The poll interval must be at least one millisecond".into(),
            ));
        }

        if self.default_baud == 0 {
            return Err(Error::BadConfig("The default baud rate can't be zero".into()));
        }

        if let TransportMode::SpawnedProcess(command) = &self.transport {
            if command.program.trim().is_empty() {
                return Err(Error::BadConfig(
                    "The monitor command needs a program to run".into(),
                ));
            }
        }

        if self.toolchain.program.trim().is_empty() {
            return Err(Error::BadConfig(
                "The toolchain needs a program to run".into(),
            ));
        }

        Ok(())
    }
}
