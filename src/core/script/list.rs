use crate::core::models::{ListDetail, ListJob};

const SCRIPT: &str = r#"puts "=== Listing All Hardware Targets and Devices ==="

open_hw_manager -quiet
connect_hw_server -url {server} -allow_non_jtag -quiet

puts "Listing all hardware targets:"
set all_targets [get_hw_targets]
foreach t $all_targets { puts "Target: $t" }

foreach t $all_targets {
    if {[catch {
        open_hw_target $t -quiet
        puts "Devices at target $t:"
        foreach d [get_hw_devices] {
            puts "Device: $d"
{property_dump}        }
        close_hw_target $t -quiet
    } err]} {
        puts "ERROR while listing target $t: $err"
        catch { close_hw_target $t -quiet }
    }
}

puts "=== Done Listing ==="
"#;

// Tagged so the live view can drop them while the log keeps them.
const PROPERTY_DUMP: &str = r##"            foreach p [list_property $d] {
                puts "#PROP $d: $p = [get_property $p $d]"
            }
"##;

pub(super) fn render(job: &ListJob) -> String {
    let property_dump = match job.detail {
        ListDetail::Brief => "",
        ListDetail::Full => PROPERTY_DUMP,
    };

    SCRIPT
        .replace("{property_dump}", property_dump)
        .replace("{server}", &job.server)
}
