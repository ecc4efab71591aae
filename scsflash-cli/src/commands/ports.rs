//! Port listing.

use console::style;
use scsflash::{DetectedPort, discover_ports, discover_scs_modems};

/// List ports command implementation.
///
/// Only SCS modems are listed unless `all` is set.
pub(crate) fn cmd_list_ports(json: bool, all: bool) {
    let detected = if all {
        discover_ports()
    } else {
        discover_scs_modems()
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&detected).unwrap_or_else(|_| "[]".to_string())
        );
        return;
    }

    print_ports(&detected);
}

fn print_ports(detected: &[DetectedPort]) {
    eprintln!("{}", style("Serial ports").bold().underlined());

    if detected.is_empty() {
        eprintln!("  {}", style("No SCS modem found").dim());
        return;
    }

    for port in detected {
        let model = port
            .model
            .map(|m| {
                format!(
                    " [{}, {} baud]",
                    style(m.name()).yellow(),
                    m.default_baud()
                )
            })
            .unwrap_or_default();
        let vid_pid = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!(" ({vid:04X}:{pid:04X})"),
            _ => String::new(),
        };
        let serial = port
            .serial
            .as_deref()
            .map(|s| format!(" - S/N {}", style(s).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{model}{vid_pid}{serial}",
            if port.is_scs_modem() {
                style("•").green()
            } else {
                style("•").dim()
            },
            style(&port.name).cyan()
        );
    }
}
