use super::{SELECT_DEVICE_PROC, TARGET_BLOCK_MARKER, braced};
use crate::core::models::FlashJob;

const HEADER: &str = r#"puts "=== Starting FPGA Flash Memory Programming ==="

open_hw_manager -quiet
connect_hw_server -url {server} -allow_non_jtag -quiet

"#;

const TARGET_BLOCK: &str = r#"{marker}{index}/{total}: {target_path} ---
puts "----------------------------------------"
puts "Programming flash memory on target: {target_path}"
puts "Device to select: {device}"

if {[catch {
    puts "Opening hardware target..."
    open_hw_target {braced_target} -quiet
    refresh_hw_server -quiet

    set hw_dev [select_device {braced_device}]
    puts "Selected device: $hw_dev"
    current_hw_device $hw_dev
    refresh_hw_device -update_hw_probes false $hw_dev -quiet
    set hw_dev_lindex [lindex [get_hw_devices $hw_dev] 0]

    puts "Checking existing attached memories..."
    set existing_cfgmem [get_property PROGRAM.HW_CFGMEM $hw_dev_lindex]
    if {$existing_cfgmem ne {}} {
        puts "Found existing attached memories:"
        foreach m $existing_cfgmem { puts "  $m" }
        puts "Removing existing memories..."
        foreach m $existing_cfgmem { delete_hw_cfgmem $m }
    }

    puts "Creating HW config memory..."
    create_hw_cfgmem -hw_device $hw_dev_lindex [lindex [get_cfgmem_parts {memory_part}] 0]
    set cfgmem [get_property PROGRAM.HW_CFGMEM $hw_dev_lindex]
    set_property PROGRAM.BLANK_CHECK {blank_check} $cfgmem
    set_property PROGRAM.ERASE {erase} $cfgmem
    set_property PROGRAM.CFG_PROGRAM {cfg_program} $cfgmem
    set_property PROGRAM.VERIFY {verify} $cfgmem
    set_property PROGRAM.CHECKSUM 0 $cfgmem
    set_property PROGRAM.ADDRESS_RANGE {use_file} $cfgmem
    set_property PROGRAM.FILES [list {image}] $cfgmem
    set_property PROGRAM.PRM_FILE {} $cfgmem
    set_property PROGRAM.UNUSED_PIN_TERMINATION {pull-none} $cfgmem

    puts "Loading configuration memory bitstream..."
    create_hw_bitstream -hw_device $hw_dev_lindex [get_property PROGRAM.HW_CFGMEM_BITFILE $hw_dev_lindex]
    program_hw_devices $hw_dev_lindex
    refresh_hw_device $hw_dev_lindex

    puts "Programming flash memory..."
    program_hw_cfgmem -hw_cfgmem $cfgmem
    refresh_hw_device -quiet $hw_dev_lindex
    close_hw_target {braced_target} -quiet
    puts "Target flash programmed successfully."
} err]} {
    puts "ERROR while programming flash memory on {target_path}: $err"
    catch { close_hw_target {braced_target} -quiet }
}

"#;

const FOOTER: &str = "puts \"=== All flash targets processed ===\"\n";

fn flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

pub(super) fn render(job: &FlashJob) -> String {
    let total = job.targets.len();
    let image = braced(&job.image.to_string_lossy());
    let memory_part = braced(&job.memory_part);

    let mut script = HEADER.replace("{server}", &job.server);
    script.push_str(SELECT_DEVICE_PROC);
    script.push_str(&format!("puts \"Found {} target(s) to program\"\n\n", total));

    for (i, target) in job.targets.iter().enumerate() {
        let target_path = target.full_path(&job.server);
        let block = TARGET_BLOCK
            .replace("{marker}", TARGET_BLOCK_MARKER)
            .replace("{index}", &(i + 1).to_string())
            .replace("{total}", &total.to_string())
            .replace("{braced_target}", &braced(&target_path))
            .replace("{target_path}", &target_path)
            .replace("{braced_device}", &braced(&target.device))
            .replace("{device}", &target.device)
            .replace("{memory_part}", &memory_part)
            .replace("{blank_check}", flag(job.flags.blank_check))
            .replace("{erase}", flag(job.flags.erase))
            .replace("{cfg_program}", flag(job.flags.cfg_program))
            .replace("{verify}", flag(job.flags.verify))
            .replace("{image}", &image);
        script.push_str(&block);
    }

    script.push_str(FOOTER);
    script
}
