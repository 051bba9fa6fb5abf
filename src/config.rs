//! Daemon configuration.
//!
//! Layered with figment, later layers winning:
//! defaults → TOML file → `HWPROGD_*` environment → CLI overrides.
//! Nested keys use `__` in the environment, e.g.
//! `HWPROGD_TOOLCHAINS__PROGRAM__SETTINGS=/opt/Xilinx/settings64.sh`.

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::core::models::{OperationKind, TargetRef};

pub const DEFAULT_CONFIG_FILE: &str = "hwprogd.toml";
pub const ENV_PREFIX: &str = "HWPROGD_";

const VIVADO_SETTINGS: &str = "/tools/Xilinx/Vivado/2022.2/settings64.sh";
const VIVADO_LAB_SETTINGS: &str = "/tools/Xilinx/Vivado_Lab/2022.2/settings64.sh";
const DEFAULT_MEMORY_PART: &str = "is25lp256d-spi-x1_x2_x4";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub http_bind: SocketAddr,
    /// Where generated scripts are written.
    pub script_dir: PathBuf,
    /// Where per-job logs are written.
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub json_logs: bool,
    /// Shell used to source the toolchain settings.
    pub shell: PathBuf,
    /// Configuration memory part used by flash jobs.
    pub flash_memory_part: String,
    pub toolchains: Toolchains,
    /// Hardware-server address book.
    pub servers: Vec<HwServer>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            http_bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            script_dir: PathBuf::from("tcl"),
            log_dir: PathBuf::from("vivado_logs"),
            verbose: false,
            json_logs: false,
            shell: PathBuf::from("bash"),
            flash_memory_part: DEFAULT_MEMORY_PART.to_string(),
            toolchains: Toolchains::default(),
            servers: Vec::new(),
        }
    }
}

/// How to launch the external toolchain for one operation kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    /// Environment setup file sourced before launching; must exist.
    pub settings: PathBuf,
    pub executable: String,
    /// Arguments; `{script}` is replaced by the generated script path.
    pub args: Vec<String>,
}

impl ToolchainConfig {
    fn batch(settings: &str, executable: &str) -> Self {
        Self {
            settings: PathBuf::from(settings),
            executable: executable.to_string(),
            args: ["-mode", "batch", "-nojournal", "-nolog", "-source", "{script}"]
                .iter()
                .map(|a| a.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Toolchains {
    pub program: ToolchainConfig,
    pub flash: ToolchainConfig,
    pub list: ToolchainConfig,
}

impl Default for Toolchains {
    fn default() -> Self {
        Self {
            program: ToolchainConfig::batch(VIVADO_SETTINGS, "vivado"),
            flash: ToolchainConfig::batch(VIVADO_LAB_SETTINGS, "vivado_lab"),
            list: ToolchainConfig::batch(VIVADO_LAB_SETTINGS, "vivado_lab"),
        }
    }
}

/// An address-book entry: a hardware server and the targets wired to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwServer {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub targets: Vec<TargetRef>,
}

impl AppConfig {
    /// Load the layered configuration.
    ///
    /// `overrides` is serialized on top of everything else, so CLI argument
    /// structs should skip `None` fields when serializing.
    pub fn new<T: Serialize>(config_file: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        let file = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        figment
            .extract()
            .with_context(|| format!("Failed to load configuration (file: {})", file.display()))
    }

    pub fn toolchain(&self, kind: OperationKind) -> &ToolchainConfig {
        match kind {
            OperationKind::Program => &self.toolchains.program,
            OperationKind::Flash => &self.toolchains.flash,
            OperationKind::List => &self.toolchains.list,
        }
    }

    pub fn server(&self, address: &str) -> Option<&HwServer> {
        self.servers.iter().find(|s| s.address == address)
    }

    /// Targets wired to `address`; unknown servers have none.
    pub fn targets_for(&self, address: &str) -> Vec<TargetRef> {
        self.server(address)
            .map(|s| s.targets.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        log_dir: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        verbose: Option<bool>,
    }

    #[test]
    fn defaults_without_file() {
        let dir = tempdir().unwrap();
        let config =
            AppConfig::new(Some(&dir.path().join("missing.toml")), None::<&Overrides>).unwrap();

        assert_eq!(config.http_bind.port(), 5000);
        assert_eq!(config.toolchain(OperationKind::Program).executable, "vivado");
        assert_eq!(config.toolchain(OperationKind::List).executable, "vivado_lab");
        assert!(config.toolchains.flash.args.contains(&"{script}".to_string()));
        assert!(config.servers.is_empty());
    }

    #[test]
    fn file_then_overrides() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("hwprogd.toml");
        std::fs::write(
            &file,
            r#"
log_dir = "/var/log/hwprogd"
script_dir = "/var/lib/hwprogd/tcl"
verbose = true

[toolchains.program]
settings = "/opt/Xilinx/Vivado/2023.1/settings64.sh"
executable = "vivado"
args = ["-mode", "batch", "-source", "{script}"]

[[servers]]
name = "Lab bench"
address = "lab-01:3121"
targets = [
    { target = "xilinx_tcf/Digilent/SN1", device = "xcvu9p" },
    { target = "xilinx_tcf/Digilent/SN2", device = "xcku040" },
]
"#,
        )
        .unwrap();

        let overrides = Overrides {
            log_dir: Some(PathBuf::from("/tmp/logs")),
            verbose: None,
        };
        let config = AppConfig::new(Some(&file), Some(&overrides)).unwrap();

        assert_eq!(config.log_dir, PathBuf::from("/tmp/logs"));
        assert_eq!(config.script_dir, PathBuf::from("/var/lib/hwprogd/tcl"));
        assert!(config.verbose);
        assert_eq!(
            config.toolchains.program.settings,
            PathBuf::from("/opt/Xilinx/Vivado/2023.1/settings64.sh")
        );
        // Untouched kinds keep their defaults.
        assert_eq!(config.toolchains.flash.executable, "vivado_lab");

        let targets = config.targets_for("lab-01:3121");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1], TargetRef::new("xilinx_tcf/Digilent/SN2", "xcku040"));
        assert!(config.targets_for("unknown:3121").is_empty());
    }
}
