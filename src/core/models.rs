use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::error::SpecError;

/// Identifiers end up inside TCL braces, so anything that could break out of
/// them is rejected before the job reaches a queue. Glob characters are
/// excluded too: device names are matched with `string match` in the script
/// and as plain substrings here.
static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.:/@+-]+$").expect("valid identifier regex"));

const FORBIDDEN_PATH_CHARS: &[char] = &['{', '}', '[', ']', '$', '"', '\\', '\n', '\r'];

/// The three operations, each with its own queue, worker and script template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Program,
    Flash,
    List,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [Self::Program, Self::Flash, Self::List];

    /// Prefix shared by the script and log artifacts of this kind.
    pub fn artifact_prefix(&self) -> &'static str {
        match self {
            Self::Program => "program-xilinx-fpga",
            Self::Flash => "program-xilinx-fpga-flash",
            Self::List => "list-xilinx-targets",
        }
    }

    pub fn finished_banner(&self) -> &'static str {
        match self {
            Self::Program => "===== FPGA Programming Finished =====",
            Self::Flash => "===== Flash Memory Programming Finished =====",
            Self::List => "===== Listing Finished =====",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Program => "program",
            Self::Flash => "flash",
            Self::List => "list",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A hardware target reachable through a server, plus the device to select on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    pub target: String,
    pub device: String,
}

impl TargetRef {
    pub fn new(target: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            device: device.into(),
        }
    }

    /// Target path as the toolchain knows it: `{server}/{target}`.
    pub fn full_path(&self, server: &str) -> String {
        format!("{}/{}", server, self.target)
    }

    /// First live device whose name contains the requested identifier.
    pub fn select_device<'a, S: AsRef<str>>(&self, live: &'a [S]) -> Option<&'a str> {
        live.iter()
            .map(AsRef::as_ref)
            .find(|name| name.contains(self.device.as_str()))
    }

    fn validate(&self) -> Result<(), SpecError> {
        validate_identifier("target", &self.target)?;
        validate_identifier("device", &self.device)
    }
}

impl FromStr for TargetRef {
    type Err = String;

    /// Parses the CLI form `TARGET=DEVICE`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((target, device)) if !target.is_empty() && !device.is_empty() => {
                Ok(Self::new(target.trim(), device.trim()))
            }
            _ => Err(format!("expected TARGET=DEVICE, got '{}'", s)),
        }
    }
}

/// Flash programming options, applied as discrete configuration-memory properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashFlags {
    pub blank_check: bool,
    pub erase: bool,
    pub cfg_program: bool,
    pub verify: bool,
}

impl Default for FlashFlags {
    fn default() -> Self {
        Self {
            blank_check: false,
            erase: false,
            cfg_program: true,
            verify: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramJob {
    pub server: String,
    pub bitstream: PathBuf,
    /// Debug probes file; skipped when absent or missing on disk at run time.
    #[serde(default)]
    pub probes: Option<PathBuf>,
    #[serde(default)]
    pub targets: Vec<TargetRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashJob {
    pub server: String,
    pub image: PathBuf,
    #[serde(default)]
    pub targets: Vec<TargetRef>,
    #[serde(default)]
    pub flags: FlashFlags,
    pub memory_part: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListDetail {
    /// Targets and device names only.
    #[default]
    Brief,
    /// Also dumps every device property to the log.
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListJob {
    pub server: String,
    #[serde(default)]
    pub detail: ListDetail,
    /// Address-book targets checked against the discovered tree.
    #[serde(default)]
    pub expected: Vec<TargetRef>,
}

/// Everything a worker needs to generate a script and run it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobSpec {
    Program(ProgramJob),
    Flash(FlashJob),
    List(ListJob),
}

impl JobSpec {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Program(_) => OperationKind::Program,
            Self::Flash(_) => OperationKind::Flash,
            Self::List(_) => OperationKind::List,
        }
    }

    pub fn server(&self) -> &str {
        match self {
            Self::Program(job) => &job.server,
            Self::Flash(job) => &job.server,
            Self::List(job) => &job.server,
        }
    }

    pub fn targets(&self) -> &[TargetRef] {
        match self {
            Self::Program(job) => &job.targets,
            Self::Flash(job) => &job.targets,
            Self::List(job) => &job.expected,
        }
    }

    /// Checks every value that will be embedded in the generated script.
    pub fn validate(&self) -> Result<(), SpecError> {
        validate_identifier("server", self.server())?;
        for target in self.targets() {
            target.validate()?;
        }

        match self {
            Self::Program(job) => {
                validate_path("bitstream", &job.bitstream)?;
                if let Some(probes) = &job.probes {
                    validate_path("probes", probes)?;
                }
            }
            Self::Flash(job) => {
                validate_path("image", &job.image)?;
                validate_identifier("memory_part", &job.memory_part)?;
            }
            Self::List(_) => {}
        }

        Ok(())
    }
}

fn validate_identifier(field: &'static str, value: &str) -> Result<(), SpecError> {
    if value.is_empty() {
        return Err(SpecError::Empty(field));
    }
    if !IDENTIFIER.is_match(value) {
        return Err(SpecError::InvalidIdentifier {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn validate_path(field: &'static str, path: &Path) -> Result<(), SpecError> {
    let text = path.to_string_lossy();
    if text.is_empty() {
        return Err(SpecError::Empty(field));
    }
    if text.contains(FORBIDDEN_PATH_CHARS) {
        return Err(SpecError::InvalidPath {
            field,
            path: path.to_path_buf(),
        });
    }
    Ok(())
}
