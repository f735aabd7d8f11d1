use std::net::Ipv4Addr;

use anyhow::Result;

use crate::hosts::{HostEntry, PublishMode};
use crate::lease::InterfaceAddress;
use crate::node::Customization;

/// Hypervisor network management.
///
/// ocpkvm-provision depends on ocpkvm-core only. At runtime, ocpkvm-runtime
/// provides implementations that drive the libvirt CLI.
pub trait NetworkApi: Send + Sync {
    /// Whether a network with this name is defined.
    fn exists(&self, name: &str) -> Result<bool>;

    /// Whether the network is started.
    fn is_active(&self, name: &str) -> Result<bool>;

    /// Define a persistent network from XML.
    fn define(&self, xml: &str) -> Result<()>;

    fn set_autostart(&self, name: &str) -> Result<()>;

    fn start(&self, name: &str) -> Result<()>;

    /// Bridge device the network is attached to.
    fn bridge_name(&self, name: &str) -> Result<String>;

    /// Live network descriptor.
    fn dump_xml(&self, name: &str) -> Result<String>;

    /// Add a DHCP host entry to both the live and persistent configuration.
    fn add_dhcp_host(&self, name: &str, host_xml: &str) -> Result<()>;
}

/// Hypervisor domain (VM) management.
pub trait DomainApi: Send + Sync {
    /// Define a persistent domain without starting it.
    fn define(&self, xml: &str) -> Result<()>;

    /// Start a transient domain from XML.
    fn create_transient(&self, xml: &str) -> Result<()>;

    fn start(&self, name: &str) -> Result<()>;

    /// Hard power-off.
    fn destroy(&self, name: &str) -> Result<()>;

    /// Whether the domain is powered on (running, paused or shutting down).
    fn is_running(&self, name: &str) -> Result<bool>;

    /// Create an empty qcow2 image of `size_gib` at `path`. An existing file
    /// is left untouched.
    fn allocate_disk(&self, path: &str, size_gib: u32) -> Result<()>;

    /// Remove the persistent definition.
    fn undefine(&self, name: &str) -> Result<()>;

    /// Interface addresses as reported by the DHCP lease database.
    fn interface_addresses(&self, name: &str) -> Result<Vec<InterfaceAddress>>;

    /// Names of all persistent domains.
    fn list(&self) -> Result<Vec<String>>;
}

/// Host service manager (systemd).
pub trait ServiceController: Send + Sync {
    fn is_active(&self, service: &str) -> Result<bool>;
    fn restart(&self, service: &str) -> Result<()>;
    fn reload(&self, service: &str) -> Result<()>;
}

/// DNS queries against a chosen server. `None` uses the host's default
/// resolver. An empty answer is `Ok(vec![])`.
pub trait DnsLookup: Send + Sync {
    fn forward(&self, name: &str, server: Option<Ipv4Addr>) -> Result<Vec<String>>;
    fn reverse(&self, ip: Ipv4Addr, server: Option<Ipv4Addr>) -> Result<Vec<String>>;
}

/// Host resolver files read and written by the DNS self-test.
pub trait ResolverFiles: Send + Sync {
    fn resolv_conf(&self) -> Result<String>;

    /// The system-wide static hosts file.
    fn system_hosts(&self) -> Result<String>;

    /// Write the test hosts file and the resolver fragment that loads it.
    fn install_test_records(&self, cluster: &str, domain: &str) -> Result<()>;

    /// Delete both test files. Missing files are fine.
    fn remove_test_records(&self) -> Result<()>;
}

/// Where and as whom to probe SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub ip: Ipv4Addr,
    pub hostname: String,
    pub key_path: String,
    pub user: String,
}

pub trait SshProber: Send + Sync {
    /// Drop cached host keys for `host` (IP or name).
    fn forget_host_key(&self, host: &str) -> Result<()>;

    /// Run a no-op remote command. `Ok(false)` means not reachable yet.
    fn probe(&self, target: &SshTarget) -> Result<bool>;
}

/// Offline disk image customization.
pub trait ImageCustomizer: Send + Sync {
    fn customize(&self, image: &str, customization: &Customization) -> Result<()>;
}

/// Per-cluster static host mapping plus the resolver fragment that loads it.
pub trait HostsStore: Send + Sync {
    /// Create the hosts file (if absent) and the resolver fragment.
    fn prepare(&self) -> Result<()>;

    fn publish(&self, entry: &HostEntry, mode: PublishMode) -> Result<()>;

    /// Delete the hosts file and resolver fragment. Missing files are fine.
    fn remove(&self) -> Result<()>;
}
