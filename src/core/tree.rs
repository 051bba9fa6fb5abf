//! Incremental reconstruction of the server → target → device hierarchy
//! from listing output.

use serde::{Deserialize, Serialize};

use super::models::TargetRef;

const TARGET_PREFIX: &str = "Target:";
const DEVICES_HEADER_PREFIX: &str = "Devices at target";
const DEVICE_PREFIX: &str = "Device:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub server: String,
    pub targets: Vec<TargetNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetNode {
    pub name: String,
    pub devices: Vec<String>,
}

/// Outcome of matching an address-book target against a discovered tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceMatch<'a> {
    Found(&'a str),
    NoDevice,
    NoTarget,
}

impl TreeSnapshot {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            targets: Vec::new(),
        }
    }

    /// Find the target entry (by full path or bare name) and select its device.
    pub fn resolve(&self, target: &TargetRef) -> DeviceMatch<'_> {
        let full_path = target.full_path(&self.server);
        let node = self
            .targets
            .iter()
            .find(|node| node.name == full_path || node.name == target.target);

        match node {
            None => DeviceMatch::NoTarget,
            Some(node) => match target.select_device(&node.devices) {
                Some(device) => DeviceMatch::Found(device),
                None => DeviceMatch::NoDevice,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    NoCurrentTarget,
    InTarget(usize),
}

/// Feeds on listing lines one at a time; only the final snapshot leaves it.
#[derive(Debug)]
pub struct TreeBuilder {
    snapshot: TreeSnapshot,
    cursor: Cursor,
}

impl TreeBuilder {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            snapshot: TreeSnapshot::new(server),
            cursor: Cursor::NoCurrentTarget,
        }
    }

    pub fn feed(&mut self, line: &str) {
        let line = line.trim();

        if let Some(name) = line.strip_prefix(TARGET_PREFIX) {
            self.snapshot.targets.push(TargetNode {
                name: name.trim().to_string(),
                devices: Vec::new(),
            });
            self.cursor = Cursor::InTarget(self.snapshot.targets.len() - 1);
        } else if let Some(rest) = line.strip_prefix(DEVICES_HEADER_PREFIX) {
            let name = rest.trim().trim_end_matches(':').trim();
            // Devices listed under a target we never announced are dropped.
            self.cursor = self
                .snapshot
                .targets
                .iter()
                .position(|node| node.name == name)
                .map_or(Cursor::NoCurrentTarget, Cursor::InTarget);
        } else if let Some(name) = line.strip_prefix(DEVICE_PREFIX) {
            if let Cursor::InTarget(index) = self.cursor {
                self.snapshot.targets[index]
                    .devices
                    .push(name.trim().to_string());
            }
        }
    }

    pub fn finish(self) -> TreeSnapshot {
        self.snapshot
    }
}
