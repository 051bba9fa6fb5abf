use super::{SELECT_DEVICE_PROC, TARGET_BLOCK_MARKER, braced};
use crate::core::models::ProgramJob;

const HEADER: &str = r#"puts "=== Starting FPGA Programming ==="

open_hw_manager -quiet
connect_hw_server -url {server} -allow_non_jtag -quiet

puts "Listing all hardware targets before opening:"
foreach t [get_hw_targets] { puts "  Target: $t" }

"#;

const TARGET_BLOCK: &str = r#"{marker}{index}/{total}: {target_path} ---
puts "----------------------------------------"
puts "Programming target: {target_path}"
puts "Device to select: {device}"

if {[catch {
    puts "Opening hardware target..."
    open_hw_target {braced_target} -quiet
    refresh_hw_server -quiet

    puts "Listing devices for target {target_path} before opening:"
    foreach d [get_hw_devices] { puts "  Device: $d" }

    set hw_dev [select_device {braced_device}]
    puts "Selected device: $hw_dev"
    current_hw_device $hw_dev
    refresh_hw_device -update_hw_probes false $hw_dev -quiet

{probes_step}
    puts "Programming device..."
    set_property PROGRAM.FILE {bitstream} $hw_dev
    program_hw_devices $hw_dev

    puts "Refreshing device..."
    refresh_hw_device $hw_dev -quiet

    puts "Closing hardware target..."
    close_hw_target {braced_target} -quiet
    puts "Target programmed successfully."
} err]} {
    puts "ERROR while programming target {target_path}: $err"
    catch { close_hw_target {braced_target} -quiet }
}

"#;

const PROBES_STEP: &str = r#"    set probes_file {probes}
    if {[file exists $probes_file]} {
        puts "Applying probes file..."
        set_property PROBES.FILE $probes_file $hw_dev
        set_property FULL_PROBES.FILE $probes_file $hw_dev
    } else {
        puts "Probes file $probes_file not found. Skipping probes."
    }
"#;

const NO_PROBES_STEP: &str = "    puts \"No probes file provided. Skipping probes.\"\n";

const FOOTER: &str = "puts \"=== All targets processed ===\"\n";

pub(super) fn render(job: &ProgramJob) -> String {
    let total = job.targets.len();
    let bitstream = braced(&job.bitstream.to_string_lossy());
    let probes_step = match &job.probes {
        Some(path) => PROBES_STEP.replace("{probes}", &braced(&path.to_string_lossy())),
        None => NO_PROBES_STEP.to_string(),
    };

    let mut script = HEADER.replace("{server}", &job.server);
    script.push_str(SELECT_DEVICE_PROC);
    script.push_str(&format!("puts \"Found {} target(s) to program\"\n\n", total));

    for (i, target) in job.targets.iter().enumerate() {
        let target_path = target.full_path(&job.server);
        let block = TARGET_BLOCK
            .replace("{probes_step}", &probes_step)
            .replace("{marker}", TARGET_BLOCK_MARKER)
            .replace("{index}", &(i + 1).to_string())
            .replace("{total}", &total.to_string())
            .replace("{braced_target}", &braced(&target_path))
            .replace("{target_path}", &target_path)
            .replace("{braced_device}", &braced(&target.device))
            .replace("{device}", &target.device)
            .replace("{bitstream}", &bitstream);
        script.push_str(&block);
    }

    script.push_str(FOOTER);
    script
}
