use anyhow::{Result, bail};

use crate::node::Role;

/// Validate a cluster name or domain label: lowercase alphanumeric + hyphens, 1-63 chars.
pub fn validate_label(label: &str, kind: &str) -> Result<()> {
    if label.is_empty() || label.len() > 63 {
        bail!("{} must be 1-63 characters, got {}", kind, label.len());
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "{} must be lowercase alphanumeric + hyphens: {:?}",
            kind,
            label
        );
    }
    if label.starts_with('-') || label.ends_with('-') {
        bail!("{} must not start or end with a hyphen: {:?}", kind, label);
    }
    Ok(())
}

/// Validate a dotted domain such as "local" or "lab.example.com".
pub fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() {
        bail!("Base domain must not be empty");
    }
    for label in domain.split('.') {
        validate_label(label, "Base domain label")?;
    }
    Ok(())
}

/// Libvirt network created for a given third octet: "ocp-<octet>".
pub fn network_name(octet: u8) -> String {
    format!("ocp-{}", octet)
}

/// Short host label for a node: "bootstrap", "master-2", "worker-1", "lb".
pub fn host_label(role: Role, ordinal: u32) -> String {
    match role {
        Role::Bootstrap => "bootstrap".to_string(),
        Role::LoadBalancer => "lb".to_string(),
        Role::Master | Role::Worker => format!("{}-{}", role.as_str(), ordinal),
    }
}

/// Libvirt domain name: "<cluster>-<host_label>".
pub fn vm_name(cluster: &str, role: Role, ordinal: u32) -> String {
    format!("{}-{}", cluster, host_label(role, ordinal))
}

/// Fully qualified host name inside the cluster domain.
pub fn fqdn(label: &str, cluster: &str, base_domain: &str) -> String {
    format!("{}.{}.{}", label, cluster, base_domain)
}

/// Disk image path for a node: "<vm_dir>/<vm_name>.qcow2".
pub fn disk_path(vm_dir: &str, vm_name: &str) -> String {
    format!("{}/{}.qcow2", vm_dir.trim_end_matches('/'), vm_name)
}

/// Stable locally administered MAC in the QEMU/KVM range for a domain name.
///
/// The installer's transient domain and the persistent definition that
/// replaces it must present the same MAC, or the pinned DHCP lease is lost
/// on the first disk boot.
pub fn mac_address(vm_name: &str) -> String {
    // 32-bit FNV-1a.
    let hash = vm_name
        .bytes()
        .fold(0x811c_9dc5_u32, |h, b| (h ^ u32::from(b)).wrapping_mul(0x0100_0193));
    let [_, a, b, c] = hash.to_be_bytes();
    format!("52:54:00:{:02x}:{:02x}:{:02x}", a, b, c)
}

/// Every domain name a cluster of this shape owns, load balancer first.
pub fn cluster_vm_names(cluster: &str, masters: u32, workers: u32) -> Vec<String> {
    let mut names = vec![
        vm_name(cluster, Role::LoadBalancer, 0),
        vm_name(cluster, Role::Bootstrap, 0),
    ];
    names.extend((1..=masters).map(|i| vm_name(cluster, Role::Master, i)));
    names.extend((1..=workers).map(|i| vm_name(cluster, Role::Worker, i)));
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_validate_label_valid() {
        assert!(validate_label("ocp4", "Cluster name").is_ok());
        assert!(validate_label("my-lab-1", "Cluster name").is_ok());
        assert!(validate_label("a", "Cluster name").is_ok());
    }

    #[test]
    fn test_validate_label_invalid() {
        assert!(validate_label("", "Cluster name").is_err());
        assert!(validate_label("UPPER", "Cluster name").is_err());
        assert!(validate_label("-leading", "Cluster name").is_err());
        assert!(validate_label("trailing-", "Cluster name").is_err());
        assert!(validate_label("has.dot", "Cluster name").is_err());
        assert!(validate_label(&"a".repeat(64), "Cluster name").is_err());
    }

    #[test]
    fn test_validate_domain() {
        assert!(validate_domain("local").is_ok());
        assert!(validate_domain("lab.example.com").is_ok());
        assert!(validate_domain("").is_err());
        assert!(validate_domain("lab..com").is_err());
    }

    #[test]
    fn test_mac_address_is_stable_and_distinct() {
        let mac = mac_address("ocp4-master-1");
        assert_eq!(mac, mac_address("ocp4-master-1"));
        assert!(mac.starts_with("52:54:00:"));
        assert_eq!(mac.len(), 17);

        let names = cluster_vm_names("ocp4", 3, 2);
        let macs: HashSet<String> = names.iter().map(|n| mac_address(n)).collect();
        assert_eq!(macs.len(), names.len());
    }

    #[test]
    fn test_network_name() {
        assert_eq!(network_name(100), "ocp-100");
    }

    #[test]
    fn test_vm_names() {
        assert_eq!(vm_name("ocp4", Role::Bootstrap, 0), "ocp4-bootstrap");
        assert_eq!(vm_name("ocp4", Role::Master, 2), "ocp4-master-2");
        assert_eq!(vm_name("ocp4", Role::Worker, 1), "ocp4-worker-1");
        assert_eq!(vm_name("ocp4", Role::LoadBalancer, 0), "ocp4-lb");
    }

    #[test]
    fn test_cluster_vm_names_are_distinct() {
        let names = cluster_vm_names("ocp4", 5, 7);
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(names.len(), 2 + 5 + 7);
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn test_fqdn_and_disk_path() {
        assert_eq!(fqdn("master-1", "ocp4", "local"), "master-1.ocp4.local");
        assert_eq!(
            disk_path("/var/lib/libvirt/images/", "ocp4-worker-1"),
            "/var/lib/libvirt/images/ocp4-worker-1.qcow2"
        );
    }
}
