use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::config::{ClusterConfig, RoleResources};
use crate::naming;

/// Node role within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Bootstrap,
    Master,
    Worker,
    LoadBalancer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bootstrap => "bootstrap",
            Self::Master => "master",
            Self::Worker => "worker",
            Self::LoadBalancer => "load-balancer",
        }
    }

    /// Ignition file fetched from the LB web server during install.
    pub fn ignition_file(&self) -> Option<&'static str> {
        match self {
            Self::Bootstrap => Some("bootstrap.ign"),
            Self::Master => Some("master.ign"),
            Self::Worker => Some("worker.ign"),
            Self::LoadBalancer => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network install boot source, present only at install time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallBoot {
    /// Directory containing `vmlinuz` and `initramfs.img`.
    pub location: String,
    pub kernel_args: String,
}

impl InstallBoot {
    pub fn kernel(&self) -> String {
        format!("{}/vmlinuz", self.location.trim_end_matches('/'))
    }

    pub fn initrd(&self) -> String {
        format!("{}/initramfs.img", self.location.trim_end_matches('/'))
    }
}

/// In-place disk image changes applied before first boot (load balancer only).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customization {
    pub ssh_pub_key: String,
    pub install: Vec<String>,
    pub uninstall: Vec<String>,
    /// "source:destination" pairs.
    pub copy_in: Vec<String>,
    pub run_commands: Vec<String>,
    pub selinux_relabel: bool,
}

/// Immutable definition of one VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub role: Role,
    /// 1..=N for masters and workers, 0 otherwise.
    pub ordinal: u32,
    /// Libvirt domain name.
    pub name: String,
    /// Short host label used in DNS ("master-1", "lb").
    pub host: String,
    pub cpus: u32,
    pub memory_mib: u32,
    pub disk_path: String,
    /// Size allocated for `disk_path` before an install boot.
    pub disk_gib: u32,
    /// Fixed NIC address shared by the install-time and persistent definitions.
    pub mac: String,
    pub network: String,
    pub install: Option<InstallBoot>,
    pub customization: Option<Customization>,
}

/// Translates cluster parameters into per-role [`NodeSpec`]s.
pub struct NodeSpecBuilder<'a> {
    config: &'a ClusterConfig,
    network: String,
}

impl<'a> NodeSpecBuilder<'a> {
    pub fn new(config: &'a ClusterConfig, network: &str) -> Self {
        Self {
            config,
            network: network.to_string(),
        }
    }

    pub fn load_balancer(&self) -> NodeSpec {
        let lb = &self.config.load_balancer;
        let mut spec = self.base(
            Role::LoadBalancer,
            0,
            RoleResources::new(lb.cpus, lb.memory_mib),
        );
        spec.disk_path = self.config.lb_disk_path();
        spec.customization = Some(Customization {
            ssh_pub_key: self.config.lb_ssh_pub_key(),
            install: lb.packages.clone(),
            uninstall: lb.uninstall.clone(),
            copy_in: lb.copy_in.clone(),
            run_commands: lb.run_commands.clone(),
            selinux_relabel: lb.selinux_relabel,
        });
        spec
    }

    pub fn bootstrap(&self, lb_ip: Ipv4Addr) -> NodeSpec {
        self.install_node(Role::Bootstrap, 0, self.config.bootstrap, lb_ip)
    }

    pub fn master(&self, ordinal: u32, lb_ip: Ipv4Addr) -> NodeSpec {
        self.install_node(Role::Master, ordinal, self.config.master, lb_ip)
    }

    pub fn worker(&self, ordinal: u32, lb_ip: Ipv4Addr) -> NodeSpec {
        self.install_node(Role::Worker, ordinal, self.config.worker, lb_ip)
    }

    /// Bootstrap, then masters 1..=N, then workers 1..=M.
    pub fn cohort(&self, lb_ip: Ipv4Addr) -> Vec<NodeSpec> {
        let mut specs = vec![self.bootstrap(lb_ip)];
        specs.extend((1..=self.config.masters).map(|i| self.master(i, lb_ip)));
        specs.extend((1..=self.config.workers).map(|i| self.worker(i, lb_ip)));
        specs
    }

    /// Kernel command line for a network install of `role`.
    pub fn kernel_args(&self, role: Role, lb_ip: Ipv4Addr) -> String {
        let install = &self.config.install;
        let port = self.config.load_balancer.web_server_port;
        let ignition = role.ignition_file().unwrap_or_default();
        format!(
            "nomodeset rd.neednet=1 coreos.inst=yes coreos.inst.install_dev={dev} \
             {image_arg}=http://{lb}:{port}/{image} \
             coreos.inst.ignition_url=http://{lb}:{port}/{ignition}",
            dev = install.install_dev,
            image_arg = install.image_url_arg,
            lb = lb_ip,
            port = port,
            image = install.image,
            ignition = ignition,
        )
    }

    fn install_node(
        &self,
        role: Role,
        ordinal: u32,
        res: RoleResources,
        lb_ip: Ipv4Addr,
    ) -> NodeSpec {
        let mut spec = self.base(role, ordinal, res);
        spec.install = Some(InstallBoot {
            location: self.config.install.location.clone(),
            kernel_args: self.kernel_args(role, lb_ip),
        });
        spec
    }

    fn base(&self, role: Role, ordinal: u32, res: RoleResources) -> NodeSpec {
        let name = naming::vm_name(&self.config.cluster_name, role, ordinal);
        NodeSpec {
            role,
            ordinal,
            disk_path: naming::disk_path(&self.config.vm_dir, &name),
            disk_gib: res.disk_gib,
            mac: naming::mac_address(&name),
            host: naming::host_label(role, ordinal),
            name,
            cpus: res.cpus,
            memory_mib: res.memory_mib,
            network: self.network.clone(),
            install: None,
            customization: None,
        }
    }
}
