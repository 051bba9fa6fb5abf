use anyhow::{Context, Result};
use chrono::Local;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};

use super::models::OperationKind;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Upper bound on suffixed stems tried within one second.
const MAX_COLLISIONS: u32 = 1000;

pub fn timestamp() -> String {
    Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Script and log locations for one job, sharing a unique stem.
#[derive(Debug)]
pub struct ArtifactPaths {
    pub stem: String,
    pub script_path: PathBuf,
    pub log_path: PathBuf,
}

impl ArtifactPaths {
    /// Reserve a stem for `kind` at `timestamp` by creating its log file.
    ///
    /// Timestamps only have second granularity, so a taken stem gets a `-2`,
    /// `-3`, ... suffix instead of clobbering an earlier job's artifacts.
    pub async fn allocate(
        script_dir: &Path,
        log_dir: &Path,
        kind: OperationKind,
        timestamp: &str,
    ) -> Result<(Self, File)> {
        for attempt in 1..=MAX_COLLISIONS {
            let stem = if attempt == 1 {
                format!("{}_{}", kind.artifact_prefix(), timestamp)
            } else {
                format!("{}_{}-{}", kind.artifact_prefix(), timestamp, attempt)
            };

            let script_path = script_dir.join(format!("{}.tcl", stem));
            if script_path.exists() {
                continue;
            }

            let log_path = log_dir.join(format!("{}.log", stem));
            match OpenOptions::new()
                .append(true)
                .create_new(true)
                .open(&log_path)
                .await
            {
                Ok(file) => {
                    let paths = Self {
                        stem,
                        script_path,
                        log_path,
                    };
                    return Ok((paths, file));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to create log file {}", log_path.display())
                    });
                }
            }
        }

        anyhow::bail!(
            "No free artifact name for {} at {} after {} attempts",
            kind,
            timestamp,
            MAX_COLLISIONS
        )
    }
}
