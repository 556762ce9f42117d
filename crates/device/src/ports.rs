//! Port analysis
//!
//! Parses the kernel socket tables (`/proc/net/tcp` and friends) dumped
//! from a device into the set of locally bound ports.

use std::collections::BTreeSet;

/// Extract the bound local ports from socket-table text.
///
/// Entry lines start with an index token ending in `:`; the second field
/// is `address:port` with the port in hex. Header lines and anything
/// unparsable are skipped. The result is sorted and deduplicated.
pub fn parse_used_ports(table: &str) -> Vec<u16> {
    let mut ports = BTreeSet::new();
    for line in table.lines() {
        let mut fields = line.split_whitespace();
        let Some(index) = fields.next() else { continue };
        if !index.ends_with(':') {
            continue;
        }
        let Some(local) = fields.next() else { continue };
        let Some((_, port_hex)) = local.rsplit_once(':') else {
            continue;
        };
        if let Ok(port) = u16::from_str_radix(port_hex, 16) {
            if port != 0 {
                ports.insert(port);
            }
        }
    }
    ports.into_iter().collect()
}
