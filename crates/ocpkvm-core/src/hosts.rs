use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::naming;

/// Directory whose presence means NetworkManager owns dnsmasq.
pub const NETWORK_MANAGER_DNS_DIR: &str = "/etc/NetworkManager/dnsmasq.d";

/// One static host mapping line: `<ip> <name> [<name>...]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostEntry {
    pub ip: Ipv4Addr,
    pub hostnames: Vec<String>,
}

impl HostEntry {
    pub fn new(ip: Ipv4Addr, hostnames: Vec<String>) -> Self {
        Self { ip, hostnames }
    }

    /// Record for a cohort node: `<ip> <host>.<cluster>.<domain>`.
    pub fn node(ip: Ipv4Addr, host: &str, cluster: &str, domain: &str) -> Self {
        Self::new(ip, vec![naming::fqdn(host, cluster, domain)])
    }

    /// Record for the load balancer, which also fronts the API endpoints.
    pub fn load_balancer(ip: Ipv4Addr, cluster: &str, domain: &str) -> Self {
        Self::new(
            ip,
            ["lb", "api", "api-int"]
                .iter()
                .map(|label| naming::fqdn(label, cluster, domain))
                .collect(),
        )
    }

    pub fn to_line(&self) -> String {
        format!("{} {}", self.ip, self.hostnames.join(" "))
    }
}

/// How a new entry is merged into the hosts file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Always add a line; stale lines for the same names are kept.
    #[default]
    Append,
    /// Drop lines naming any of the entry's hostnames, then add.
    Upsert,
}

/// Return the new hosts-file content after publishing `entry`.
pub fn apply(existing: &str, entry: &HostEntry, mode: PublishMode) -> String {
    let mut lines: Vec<&str> = existing.lines().collect();
    if mode == PublishMode::Upsert {
        lines.retain(|line| {
            let mut fields = line.split_whitespace();
            fields.next();
            !fields.any(|name| entry.hostnames.iter().any(|h| h == name))
        });
    }
    let mut out = String::new();
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&entry.to_line());
    out.push('\n');
    out
}

/// The name-resolution daemon that reads the cluster's hosts file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolverService {
    NetworkManager,
    Dnsmasq,
}

impl ResolverService {
    pub fn from_dns_dir(dns_dir: &str) -> Self {
        if dns_dir.trim_end_matches('/') == NETWORK_MANAGER_DNS_DIR {
            Self::NetworkManager
        } else {
            Self::Dnsmasq
        }
    }

    /// systemd unit name.
    pub fn unit(&self) -> &'static str {
        match self {
            Self::NetworkManager => "NetworkManager",
            Self::Dnsmasq => "dnsmasq",
        }
    }
}

/// Dnsmasq fragment that pulls in the cluster hosts file.
pub fn resolver_fragment(hosts_path: &str) -> String {
    format!("addn-hosts={}\n", hosts_path)
}
