use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;
use crate::hosts::{PublishMode, ResolverService};
use crate::naming;
use crate::network::NetworkSelector;
use crate::retry::PollPolicy;

pub const DEFAULT_LIBVIRT_URI: &str = "qemu:///system";
pub const DEFAULT_VM_DIR: &str = "/var/lib/libvirt/images";
pub const DEFAULT_DNS_DIR: &str = "/etc/NetworkManager/dnsmasq.d";
/// Size of a freshly allocated node disk when a role sets none.
pub const DEFAULT_DISK_GIB: u32 = 120;
/// Libvirt's own network daemon, restarted after every resolver reload.
pub const LIBVIRT_NETWORK_SERVICE: &str = "virtnetworkd";

/// Immutable cluster-wide parameters, threaded through every stage.
///
/// Loaded from TOML; every field has a default so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub cluster_name: String,
    pub base_domain: String,
    pub masters: u32,
    pub workers: u32,
    pub vm_dir: String,
    pub libvirt_uri: String,
    pub network: NetworkSection,
    pub bootstrap: RoleResources,
    pub master: RoleResources,
    pub worker: RoleResources,
    pub load_balancer: LoadBalancerSection,
    pub install: InstallSection,
    pub dns: DnsSection,
    pub ssh: SshSection,
    pub poll: PollSection,
}

/// Exactly one of `octet` / `name` must be set. An explicit `[network]`
/// table replaces the default octet rather than merging with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSection {
    pub octet: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleResources {
    pub cpus: u32,
    pub memory_mib: u32,
    /// qcow2 size allocated before the install boot.
    #[serde(default = "default_disk_gib")]
    pub disk_gib: u32,
}

fn default_disk_gib() -> u32 {
    DEFAULT_DISK_GIB
}

impl RoleResources {
    pub const fn new(cpus: u32, memory_mib: u32) -> Self {
        Self {
            cpus,
            memory_mib,
            disk_gib: DEFAULT_DISK_GIB,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancerSection {
    pub cpus: u32,
    pub memory_mib: u32,
    /// Port of the temporary web server on the LB serving images and ignition files.
    pub web_server_port: u16,
    /// Disk image to customize and boot. Defaults to `<vm_dir>/<cluster>-lb.qcow2`.
    pub disk: Option<String>,
    /// Public key injected for root. Defaults to `<ssh.private_key>.pub`.
    pub ssh_pub_key: Option<String>,
    pub packages: Vec<String>,
    pub uninstall: Vec<String>,
    /// "source:destination" pairs copied into the image.
    pub copy_in: Vec<String>,
    pub run_commands: Vec<String>,
    pub selinux_relabel: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallSection {
    /// Directory holding `vmlinuz` and `initramfs.img` for network install.
    pub location: String,
    pub install_dev: String,
    /// Kernel argument that carries the image URL (varies across RHCOS releases).
    pub image_url_arg: String,
    /// Image file name served by the LB web server.
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsSection {
    pub dns_dir: String,
    pub hosts_dir: String,
    /// Replace existing lines for the same host names instead of appending.
    pub upsert: bool,
    pub settle_secs: u64,
    /// Run the resolver self-test before creating any VM.
    pub check: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub private_key: String,
    pub lb_user: String,
    pub node_user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSection {
    pub interval_secs: u64,
    /// `None` waits forever.
    pub lease_max_attempts: Option<u32>,
    /// `None` waits forever.
    pub ssh_max_attempts: Option<u32>,
    /// Polls for an installer to power its VM off. `None` waits forever.
    pub install_max_attempts: Option<u32>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            cluster_name: "ocp4".to_string(),
            base_domain: "local".to_string(),
            masters: 3,
            workers: 2,
            vm_dir: DEFAULT_VM_DIR.to_string(),
            libvirt_uri: DEFAULT_LIBVIRT_URI.to_string(),
            network: NetworkSection::default(),
            bootstrap: RoleResources::new(4, 16000),
            master: RoleResources::new(4, 16000),
            worker: RoleResources::new(2, 8000),
            load_balancer: LoadBalancerSection::default(),
            install: InstallSection::default(),
            dns: DnsSection::default(),
            ssh: SshSection::default(),
            poll: PollSection::default(),
        }
    }
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            octet: Some("100".to_string()),
            name: None,
        }
    }
}

impl Default for RoleResources {
    fn default() -> Self {
        Self::new(2, 8000)
    }
}

impl Default for LoadBalancerSection {
    fn default() -> Self {
        Self {
            cpus: 4,
            memory_mib: 1536,
            web_server_port: 1234,
            disk: None,
            ssh_pub_key: None,
            packages: vec!["haproxy".to_string(), "bind-utils".to_string()],
            uninstall: vec!["cloud-init".to_string()],
            copy_in: vec![
                "haproxy.cfg:/etc/haproxy".to_string(),
                "bootstrap.ign:/opt/".to_string(),
            ],
            run_commands: vec![
                "systemctl daemon-reload".to_string(),
                "systemctl enable haproxy".to_string(),
            ],
            selinux_relabel: true,
        }
    }
}

impl Default for InstallSection {
    fn default() -> Self {
        Self {
            location: "rhcos-install".to_string(),
            install_dev: "vda".to_string(),
            image_url_arg: "coreos.inst.image_url".to_string(),
            image: "rhcos-metal.raw.gz".to_string(),
        }
    }
}

impl Default for DnsSection {
    fn default() -> Self {
        Self {
            dns_dir: DEFAULT_DNS_DIR.to_string(),
            hosts_dir: "/etc".to_string(),
            upsert: false,
            settle_secs: 5,
            check: true,
        }
    }
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            private_key: "sshkey".to_string(),
            lb_user: "root".to_string(),
            node_user: "core".to_string(),
        }
    }
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            lease_max_attempts: None,
            ssh_max_attempts: None,
            install_max_attempts: None,
        }
    }
}

impl ClusterConfig {
    /// Load cluster config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cluster config: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse cluster config from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).with_context(|| "Failed to parse cluster config TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would fail later against real hosts.
    pub fn validate(&self) -> Result<()> {
        naming::validate_label(&self.cluster_name, "Cluster name")
            .map_err(|e| ProvisionError::config(e.to_string()))?;
        naming::validate_domain(&self.base_domain)
            .map_err(|e| ProvisionError::config(e.to_string()))?;

        if self.masters == 0 {
            return Err(ProvisionError::config("masters must be > 0").into());
        }

        let roles = [
            ("bootstrap", self.bootstrap),
            ("master", self.master),
            ("worker", self.worker),
            (
                "load balancer",
                RoleResources::new(self.load_balancer.cpus, self.load_balancer.memory_mib),
            ),
        ];
        for (role, res) in roles {
            if res.cpus == 0 || res.memory_mib == 0 || res.disk_gib == 0 {
                return Err(ProvisionError::config(format!(
                    "{} cpus, memory and disk must be > 0 (cpus={}, memory_mib={}, disk_gib={})",
                    role, res.cpus, res.memory_mib, res.disk_gib
                ))
                .into());
            }
        }

        if self.poll.interval_secs == 0 {
            return Err(ProvisionError::config("poll interval must be > 0").into());
        }

        self.network_selector()?;
        Ok(())
    }

    /// Anchor relative install and disk locations at `base`. The hypervisor
    /// resolves paths in its own working directory, not ours.
    pub fn resolve_paths(&mut self, base: &Path) {
        let anchor = |p: &str| -> String {
            if Path::new(p).is_absolute() {
                p.to_string()
            } else {
                base.join(p).to_string_lossy().into_owned()
            }
        };
        self.install.location = anchor(&self.install.location);
        self.vm_dir = anchor(&self.vm_dir);
        if let Some(disk) = &self.load_balancer.disk {
            self.load_balancer.disk = Some(anchor(disk));
        }
    }

    /// Installer kernel and initrd, as configured.
    pub fn install_files(&self) -> [PathBuf; 2] {
        let dir = Path::new(&self.install.location);
        [dir.join("vmlinuz"), dir.join("initramfs.img")]
    }

    pub fn network_selector(&self) -> Result<NetworkSelector> {
        NetworkSelector::resolve(self.network.octet.as_deref(), self.network.name.as_deref())
    }

    pub fn lb_disk_path(&self) -> String {
        self.load_balancer.disk.clone().unwrap_or_else(|| {
            naming::disk_path(
                &self.vm_dir,
                &naming::vm_name(&self.cluster_name, crate::node::Role::LoadBalancer, 0),
            )
        })
    }

    pub fn lb_ssh_pub_key(&self) -> String {
        self.load_balancer
            .ssh_pub_key
            .clone()
            .unwrap_or_else(|| format!("{}.pub", self.ssh.private_key))
    }

    /// Per-cluster static host mapping file: "<hosts_dir>/hosts.<cluster>".
    pub fn hosts_path(&self) -> String {
        format!(
            "{}/hosts.{}",
            self.dns.hosts_dir.trim_end_matches('/'),
            self.cluster_name
        )
    }

    /// Resolver fragment pointing at the hosts file: "<dns_dir>/<cluster>.conf".
    pub fn resolver_fragment_path(&self) -> String {
        format!(
            "{}/{}.conf",
            self.dns.dns_dir.trim_end_matches('/'),
            self.cluster_name
        )
    }

    /// Throwaway hosts file written by the resolver self-test.
    pub fn dns_test_hosts_path(&self) -> String {
        format!("{}/hosts.dnstest", self.dns.hosts_dir.trim_end_matches('/'))
    }

    /// Resolver fragment written by the resolver self-test.
    pub fn dns_test_fragment_path(&self) -> String {
        format!("{}/dnstest.conf", self.dns.dns_dir.trim_end_matches('/'))
    }

    pub fn resolver_service(&self) -> ResolverService {
        ResolverService::from_dns_dir(&self.dns.dns_dir)
    }

    pub fn publish_mode(&self) -> PublishMode {
        if self.dns.upsert {
            PublishMode::Upsert
        } else {
            PublishMode::Append
        }
    }

    pub fn lease_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.poll.interval_secs),
            self.poll.lease_max_attempts,
        )
    }

    pub fn ssh_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.poll.interval_secs),
            self.poll.ssh_max_attempts,
        )
    }

    pub fn install_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_secs(self.poll.interval_secs),
            self.poll.install_max_attempts,
        )
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.dns.settle_secs)
    }
}
