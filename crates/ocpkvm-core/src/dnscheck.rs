use std::fmt;
use std::net::Ipv4Addr;

use serde::Serialize;

use crate::naming;

/// Throwaway record served from the test hosts file.
pub const TEST_HOST: &str = "xxxtestxxx";
pub const TEST_HOST_IP: Ipv4Addr = Ipv4Addr::new(1, 2, 3, 4);
/// Wildcard zone answered by the test fragment's `address=` line.
pub const WILDCARD_ZONE: &str = "test-wild-card";
pub const WILDCARD_IP: Ipv4Addr = Ipv4Addr::new(5, 6, 7, 8);
/// Local resolver queried for leftover cluster records.
pub const LOCAL_RESOLVER: Ipv4Addr = Ipv4Addr::LOCALHOST;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupKind {
    Forward,
    Reverse,
    Wildcard,
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Forward => "forward",
            Self::Reverse => "reverse",
            Self::Wildcard => "wildcard",
        })
    }
}

/// One query the resolver must answer once the test records are loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupCase {
    pub kind: LookupKind,
    /// Name for forward and wildcard lookups, dotted IPv4 for reverse.
    pub query: String,
    pub expected: String,
}

/// Forward, reverse and wildcard cases for a cluster domain.
pub fn lookup_cases(cluster: &str, domain: &str) -> Vec<LookupCase> {
    let test_name = format!("{}.{}", TEST_HOST, domain);
    vec![
        LookupCase {
            kind: LookupKind::Forward,
            query: test_name.clone(),
            expected: TEST_HOST_IP.to_string(),
        },
        LookupCase {
            kind: LookupKind::Reverse,
            query: TEST_HOST_IP.to_string(),
            expected: format!("{}.", test_name),
        },
        LookupCase {
            kind: LookupKind::Wildcard,
            query: format!("blah.{}", naming::fqdn(WILDCARD_ZONE, cluster, domain)),
            expected: WILDCARD_IP.to_string(),
        },
    ]
}

/// Hosts-file line for the test record.
pub fn test_hosts_line(domain: &str) -> String {
    format!("{} {}.{}\n", TEST_HOST_IP, TEST_HOST, domain)
}

/// dnsmasq fragment that serves the cluster zone locally, loads the test
/// hosts file and answers the wildcard zone.
pub fn test_fragment(cluster: &str, domain: &str, test_hosts_path: &str) -> String {
    format!(
        "local=/{cluster}.{domain}/\naddn-hosts={hosts}\naddress=/{zone}/{ip}\n",
        cluster = cluster,
        domain = domain,
        hosts = test_hosts_path,
        zone = naming::fqdn(WILDCARD_ZONE, cluster, domain),
        ip = WILDCARD_IP,
    )
}

/// Address of the first `nameserver` line in resolv.conf content.
pub fn first_nameserver(resolv_conf: &str) -> Option<&str> {
    resolv_conf.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("nameserver") => fields.next(),
            _ => None,
        }
    })
}

/// The host resolves through a local dnsmasq only if the first nameserver is
/// in 127.0.0.0/8.
pub fn is_local_nameserver(addr: &str) -> bool {
    addr.parse::<Ipv4Addr>().is_ok_and(|ip| ip.is_loopback())
}

/// Cluster names that must not resolve before the cluster exists.
pub fn reserved_names(cluster: &str, domain: &str, masters: u32, workers: u32) -> Vec<String> {
    let mut labels = vec!["api".to_string(), "api-int".to_string(), "bootstrap".to_string()];
    labels.extend((1..=masters).map(|i| format!("master-{}", i)));
    labels.extend((0..masters).map(|i| format!("etcd-{}", i)));
    labels.extend((1..=workers).map(|i| format!("worker-{}", i)));
    labels.push("test.apps".to_string());
    labels
        .iter()
        .map(|label| naming::fqdn(label, cluster, domain))
        .collect()
}

/// Uncommented system hosts lines that already mention the cluster domain.
pub fn hosts_conflicts(system_hosts: &str, cluster: &str, domain: &str) -> Vec<String> {
    let zone = format!("{}.{}", cluster, domain);
    system_hosts
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| line.contains(&zone))
        .map(str::to_string)
        .collect()
}
