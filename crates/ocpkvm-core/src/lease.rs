use std::net::Ipv4Addr;

use serde::Serialize;

/// One row of the hypervisor's interface-address report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceAddress {
    pub interface: String,
    /// Empty when the hypervisor prints "-" or nothing.
    pub mac: String,
    /// "ipv4" or "ipv6".
    pub protocol: String,
    /// Address with optional "/prefix".
    pub address: String,
}

/// A VM's DHCP-leased (MAC, IPv4) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaseRecord {
    pub vm_name: String,
    pub mac: String,
    pub ip: Ipv4Addr,
}

/// Parse `virsh domifaddr` tabular output.
///
/// ```text
///  Name       MAC address          Protocol     Address
/// -------------------------------------------------------------------------------
///  vnet0      52:54:00:aa:bb:cc    ipv4         192.168.100.5/24
/// ```
///
/// Header, separator and short rows are skipped. Continuation rows, which
/// print `-` in both the Name and MAC columns for an interface's second and
/// later addresses, inherit the interface and MAC of the row above.
pub fn parse_domifaddr(output: &str) -> Vec<InterfaceAddress> {
    let mut rows: Vec<InterfaceAddress> = Vec::new();
    for line in output.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 4 || cols[0] == "Name" || cols[0].starts_with("---") {
            continue;
        }
        let (interface, mac) = match rows.last() {
            Some(prev) if cols[0] == "-" && cols[1] == "-" => {
                (prev.interface.clone(), prev.mac.clone())
            }
            _ => {
                let mac = if cols[1] == "-" { "" } else { cols[1] };
                (cols[0].to_string(), mac.to_string())
            }
        };
        rows.push(InterfaceAddress {
            interface,
            mac,
            protocol: cols[2].to_lowercase(),
            address: cols[3].to_string(),
        });
    }
    rows
}

/// Pick the first IPv4 entry reported with a non-empty MAC.
pub fn select_lease(vm_name: &str, addrs: &[InterfaceAddress]) -> Option<LeaseRecord> {
    addrs.iter().find_map(|a| {
        if a.protocol != "ipv4" || a.mac.is_empty() {
            return None;
        }
        let host = a.address.split('/').next().unwrap_or_default();
        let ip: Ipv4Addr = host.parse().ok()?;
        Some(LeaseRecord {
            vm_name: vm_name.to_string(),
            mac: a.mac.clone(),
            ip,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
 Name       MAC address          Protocol     Address
-------------------------------------------------------------------------------
 vnet3      52:54:00:12:34:56    ipv6         fe80::5054:ff:fe12:3456/64
 -          -                    ipv4         192.168.100.9/24
 vnet4      52:54:00:ab:cd:ef    ipv4         192.168.100.23/24
";

    #[test]
    fn test_parse_skips_header_and_separator() {
        let rows = parse_domifaddr(SAMPLE);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].interface, "vnet3");
        assert_eq!(rows[2].address, "192.168.100.23/24");
    }

    #[test]
    fn test_continuation_row_inherits_interface_and_mac() {
        let rows = parse_domifaddr(SAMPLE);
        assert_eq!(rows[1].interface, "vnet3");
        assert_eq!(rows[1].mac, "52:54:00:12:34:56");
        assert_eq!(rows[1].protocol, "ipv4");
    }

    #[test]
    fn test_select_takes_ipv4_listed_after_ipv6() {
        let output = "\
 Name       MAC address          Protocol     Address
-------------------------------------------------------------------------------
 vnet0      52:54:00:ab:cd:ef    ipv6         fd00::10/64
 -          -                    ipv4         192.168.100.23/24
";
        let lease = select_lease("ocp4-bootstrap", &parse_domifaddr(output))
            .expect("ipv4 lease on vnet0 should be selected");
        assert_eq!(lease.mac, "52:54:00:ab:cd:ef");
        assert_eq!(lease.ip, Ipv4Addr::new(192, 168, 100, 23));
    }

    #[test]
    fn test_select_requires_ipv4_and_mac() {
        let output = "\
 Name       MAC address          Protocol     Address
-------------------------------------------------------------------------------
 lo         -                    ipv4         127.0.0.1/8
 vnet4      52:54:00:ab:cd:ef    ipv6         fe80::5054:ff:feab:cdef/64
 vnet5      52:54:00:00:00:05    ipv4         192.168.100.23/24
";
        let rows = parse_domifaddr(output);
        assert_eq!(rows[0].mac, "");
        let lease = select_lease("ocp4-lb", &rows).unwrap();
        assert_eq!(lease.vm_name, "ocp4-lb");
        assert_eq!(lease.mac, "52:54:00:00:00:05");
        assert_eq!(lease.ip, Ipv4Addr::new(192, 168, 100, 23));
    }

    #[test]
    fn test_leading_dash_row_without_predecessor_has_no_mac() {
        let rows = parse_domifaddr(" -  -  ipv4  192.168.100.9/24\n");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].mac, "");
        assert!(select_lease("ocp4-lb", &rows).is_none());
    }

    #[test]
    fn test_select_none_when_empty() {
        let header_only = "\
 Name       MAC address          Protocol     Address
-------------------------------------------------------------------------------
";
        assert!(parse_domifaddr(header_only).is_empty());
        assert!(select_lease("ocp4-lb", &[]).is_none());
    }

    #[test]
    fn test_select_rejects_malformed_address() {
        let rows = vec![InterfaceAddress {
            interface: "vnet0".to_string(),
            mac: "52:54:00:00:00:01".to_string(),
            protocol: "ipv4".to_string(),
            address: "not-an-ip".to_string(),
        }];
        assert!(select_lease("ocp4-bootstrap", &rows).is_none());
    }
}
