//! Parser for the scanner's plain-text output.
//!
//! The scanner is asked for one device per line, `ip<TAB>mac`, optionally
//! followed by a vendor column. Anything else the tool prints (banners,
//! summaries, duplicate-response notes) fails validation and is dropped.

use std::net::Ipv4Addr;

use lanwatch_core::{DiscoveredDevice, MacAddr};

/// Devices parsed from one scan, plus how many lines were rejected.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanOutput {
    pub devices: Vec<DiscoveredDevice>,
    pub rejected_lines: usize,
}

/// Parse the whole stdout of a scan. Blank lines are skipped silently,
/// malformed ones are logged at warn and counted.
pub fn parse_scan_output(stdout: &str) -> ScanOutput {
    let mut output = ScanOutput::default();

    for (idx, line) in stdout.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(device) => output.devices.push(device),
            None => {
                tracing::warn!(line_no = idx + 1, line = %line.trim(), "Dropping unparseable scanner line");
                output.rejected_lines += 1;
            }
        }
    }

    output
}

/// Parse a single `ip<TAB>mac[<TAB>vendor]` line.
pub fn parse_line(line: &str) -> Option<DiscoveredDevice> {
    let mut fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    if fields.len() < 2 {
        fields = line.split_whitespace().collect();
    }
    if fields.len() < 2 {
        return None;
    }

    let ip: Ipv4Addr = fields[0].parse().ok()?;
    let mac: MacAddr = fields[1].parse().ok()?;
    let vendor = fields
        .get(2..)
        .map(|rest| rest.join(" ").trim().to_string())
        .filter(|v| !v.is_empty());

    Some(DiscoveredDevice { ip, mac, vendor })
}
