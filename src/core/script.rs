//! Toolchain script generation.
//!
//! Rendering is pure: a [`JobSpec`] maps to exactly one script text. Values are
//! substituted into const templates and embedded in TCL braces; the queue
//! boundary has already rejected anything that could escape them.
//!
//! ## Variants
//!
//! - `program`: one guarded block per target that selects a device and pushes a bitstream
//! - `flash`: like `program`, but (re)creates the configuration memory and programs it
//! - `list`: enumerates every target and device, optionally dumping device properties

mod flash;
mod list;
mod program;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::core::models::JobSpec;

/// Marker that opens every per-target block in the programming scripts.
pub const TARGET_BLOCK_MARKER: &str = "# --- target ";

/// Prints the available devices and fails the current target when nothing matches.
const SELECT_DEVICE_PROC: &str = r#"proc select_device {device_name} {
    set devices [get_hw_devices]
    foreach d $devices {
        if {[string match "*${device_name}*" $d]} {
            return $d
        }
    }
    puts "Available devices at this target:"
    foreach d $devices { puts "  $d" }
    error "Device matching $device_name not found!"
}

"#;

/// Writes rendered scripts into the work directory.
pub struct ScriptGenerator {
    script_dir: PathBuf,
}

impl ScriptGenerator {
    pub fn new(script_dir: impl Into<PathBuf>) -> Self {
        Self {
            script_dir: script_dir.into(),
        }
    }

    pub fn script_path(&self, stem: &str) -> PathBuf {
        self.script_dir.join(format!("{}.tcl", stem))
    }

    /// Render the script for `spec`.
    pub fn render(spec: &JobSpec) -> String {
        match spec {
            JobSpec::Program(job) => program::render(job),
            JobSpec::Flash(job) => flash::render(job),
            JobSpec::List(job) => list::render(job),
        }
    }

    /// Render and persist the script as `{stem}.tcl`. Never overwrites an existing file.
    pub async fn generate(&self, spec: &JobSpec, stem: &str) -> Result<PathBuf> {
        let path = self.script_path(stem);
        let script = Self::render(spec);

        write_new(&path, &script)
            .await
            .with_context(|| format!("Failed to write script {}", path.display()))?;

        Ok(path)
    }
}

async fn write_new(path: &Path, content: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

/// Wrap a value in TCL braces so it is taken literally.
fn braced(value: &str) -> String {
    format!("{{{}}}", value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{
        FlashFlags, FlashJob, ListDetail, ListJob, ProgramJob, TargetRef,
    };
    use tempfile::tempdir;

    fn targets(n: usize) -> Vec<TargetRef> {
        (0..n)
            .map(|i| TargetRef::new(format!("xilinx_tcf/Digilent/SN{}", i), "xcvu9p"))
            .collect()
    }

    fn program_spec(targets: Vec<TargetRef>, probes: Option<&str>) -> JobSpec {
        JobSpec::Program(ProgramJob {
            server: "lab-01:3121".into(),
            bitstream: PathBuf::from("/srv/uploads/top.bit"),
            probes: probes.map(PathBuf::from),
            targets,
        })
    }

    fn flash_spec(targets: Vec<TargetRef>, flags: FlashFlags) -> JobSpec {
        JobSpec::Flash(FlashJob {
            server: "lab-01:3121".into(),
            image: PathBuf::from("/srv/uploads/top.bin"),
            targets,
            flags,
            memory_part: "is25lp256d-spi-x1_x2_x4".into(),
        })
    }

    fn block_count(script: &str) -> usize {
        script
            .lines()
            .filter(|line| line.starts_with(TARGET_BLOCK_MARKER))
            .count()
    }

    #[test]
    fn program_script_has_one_block_per_target_in_order() {
        for n in [0, 1, 3, 7] {
            let script = ScriptGenerator::render(&program_spec(targets(n), None));
            assert_eq!(block_count(&script), n, "targets = {}", n);
        }

        let script = ScriptGenerator::render(&program_spec(targets(3), None));
        let positions: Vec<usize> = (0..3)
            .map(|i| {
                script
                    .find(&format!("# --- target {}/3: lab-01:3121/xilinx_tcf/Digilent/SN{} ---", i + 1, i))
                    .expect("block header present")
            })
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn program_script_targets_full_path_and_device() {
        let script = ScriptGenerator::render(&program_spec(
            vec![TargetRef::new("xilinx_tcf/Digilent/210308A", "vu9p")],
            None,
        ));

        assert!(script.contains("connect_hw_server -url lab-01:3121 -allow_non_jtag -quiet"));
        assert!(script.contains("open_hw_target {lab-01:3121/xilinx_tcf/Digilent/210308A} -quiet"));
        assert!(script.contains("set hw_dev [select_device {vu9p}]"));
        assert!(script.contains("set_property PROGRAM.FILE {/srv/uploads/top.bit} $hw_dev"));
        assert!(script.contains("proc select_device {device_name}"));
    }

    #[test]
    fn program_script_failures_do_not_abort_remaining_targets() {
        let script = ScriptGenerator::render(&program_spec(targets(2), None));
        assert_eq!(script.matches("if {[catch {").count(), 2);
        assert_eq!(script.matches("ERROR while programming target").count(), 2);
        assert!(script.trim_end().ends_with("puts \"=== All targets processed ===\""));
    }

    #[test]
    fn empty_target_list_renders_no_op_script() {
        let script = ScriptGenerator::render(&program_spec(vec![], None));
        assert_eq!(block_count(&script), 0);
        assert!(script.contains("Found 0 target(s) to program"));
        assert!(!script.contains("open_hw_target {"));
    }

    #[test]
    fn probes_are_optional() {
        let without = ScriptGenerator::render(&program_spec(targets(1), None));
        assert!(without.contains("No probes file provided. Skipping probes."));
        assert!(!without.contains("PROBES.FILE"));

        let with = ScriptGenerator::render(&program_spec(targets(1), Some("/srv/uploads/top.ltx")));
        assert!(with.contains("set probes_file {/srv/uploads/top.ltx}"));
        assert!(with.contains("if {[file exists $probes_file]} {"));
        assert!(with.contains("set_property FULL_PROBES.FILE $probes_file $hw_dev"));
        assert!(with.contains("Skipping probes."));
    }

    #[test]
    fn flash_script_cleans_up_before_creating_memory() {
        let script = ScriptGenerator::render(&flash_spec(targets(2), FlashFlags::default()));
        assert_eq!(block_count(&script), 2);

        let delete = script.find("delete_hw_cfgmem").unwrap();
        let create = script.find("create_hw_cfgmem").unwrap();
        let program = script.find("program_hw_cfgmem").unwrap();
        assert!(delete < create && create < program);

        assert!(script.contains("[get_cfgmem_parts {is25lp256d-spi-x1_x2_x4}]"));
        assert!(script.contains("set_property PROGRAM.FILES [list {/srv/uploads/top.bin}] $cfgmem"));
    }

    #[test]
    fn flash_script_applies_flags_as_properties() {
        let flags = FlashFlags {
            blank_check: true,
            erase: true,
            cfg_program: false,
            verify: false,
        };
        let script = ScriptGenerator::render(&flash_spec(targets(1), flags));

        assert!(script.contains("set_property PROGRAM.BLANK_CHECK 1 $cfgmem"));
        assert!(script.contains("set_property PROGRAM.ERASE 1 $cfgmem"));
        assert!(script.contains("set_property PROGRAM.CFG_PROGRAM 0 $cfgmem"));
        assert!(script.contains("set_property PROGRAM.VERIFY 0 $cfgmem"));
    }

    #[test]
    fn list_script_full_variant_dumps_tagged_properties() {
        let brief = ScriptGenerator::render(&JobSpec::List(ListJob {
            server: "lab-01:3121".into(),
            detail: ListDetail::Brief,
            expected: vec![],
        }));
        assert!(brief.contains("puts \"Devices at target $t:\""));
        assert!(brief.contains("puts \"Device: $d\""));
        assert!(!brief.contains("#PROP"));

        let full = ScriptGenerator::render(&JobSpec::List(ListJob {
            server: "lab-01:3121".into(),
            detail: ListDetail::Full,
            expected: vec![],
        }));
        let device_loop = r##"        foreach d [get_hw_devices] {
            puts "Device: $d"
            foreach p [list_property $d] {
                puts "#PROP $d: $p = [get_property $p $d]"
            }
        }
        close_hw_target $t -quiet
"##;
        assert!(full.contains(device_loop), "full script:\n{}", full);
        assert!(full.contains("connect_hw_server -url lab-01:3121"));
    }

    #[test]
    fn render_is_deterministic() {
        let spec = flash_spec(targets(3), FlashFlags::default());
        assert_eq!(ScriptGenerator::render(&spec), ScriptGenerator::render(&spec));
    }

    #[tokio::test]
    async fn generate_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let generator = ScriptGenerator::new(dir.path());
        let spec = program_spec(targets(1), None);

        let path = generator
            .generate(&spec, "program-xilinx-fpga_2026-01-01_00-00-00")
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("program-xilinx-fpga_2026-01-01_00-00-00.tcl"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            ScriptGenerator::render(&spec)
        );

        let again = generator
            .generate(&spec, "program-xilinx-fpga_2026-01-01_00-00-00")
            .await;
        assert!(again.is_err());
    }
}
