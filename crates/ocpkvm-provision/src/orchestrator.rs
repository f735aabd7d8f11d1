use std::fmt;
use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use ocpkvm_core::capability::{
    DnsLookup, DomainApi, HostsStore, ImageCustomizer, NetworkApi, ResolverFiles,
    ServiceController, SshProber, SshTarget,
};
use ocpkvm_core::config::ClusterConfig;
use ocpkvm_core::error::ProvisionError;
use ocpkvm_core::hosts::HostEntry;
use ocpkvm_core::lease::LeaseRecord;
use ocpkvm_core::naming;
use ocpkvm_core::network::VirtualNetwork;
use ocpkvm_core::node::{NodeSpec, NodeSpecBuilder};
use ocpkvm_core::retry::Sleeper;

use crate::dns::{LookupOutcome, ResolverCheck};
use crate::{dhcp, dns, lifecycle, network, readiness};

/// Pipeline stages. Each track only ever moves forward; the first error
/// aborts the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    NetworkReady,
    DnsChecked,
    LbCreated,
    LbAddressed,
    LbReachable,
    NodesCreated,
    NodesAddressed,
    NodesInstalled,
    BootstrapReachable,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkReady => "network-ready",
            Self::DnsChecked => "dns-checked",
            Self::LbCreated => "lb-created",
            Self::LbAddressed => "lb-addressed",
            Self::LbReachable => "lb-reachable",
            Self::NodesCreated => "nodes-created",
            Self::NodesAddressed => "nodes-addressed",
            Self::NodesInstalled => "nodes-installed",
            Self::BootstrapReachable => "bootstrap-reachable",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host backends the pipeline drives.
#[derive(Clone, Copy)]
pub struct ProvisionEnv<'a> {
    pub networks: &'a dyn NetworkApi,
    pub domains: &'a dyn DomainApi,
    pub services: &'a dyn ServiceController,
    pub lookup: &'a dyn DnsLookup,
    pub resolver_files: &'a dyn ResolverFiles,
    pub ssh: &'a dyn SshProber,
    pub customizer: &'a dyn ImageCustomizer,
    pub hosts: &'a dyn HostsStore,
    pub sleeper: &'a dyn Sleeper,
}

/// A created VM together with the lease it was pinned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedNode {
    pub spec: NodeSpec,
    pub fqdn: String,
    pub lease: LeaseRecord,
}

/// What one provisioning run produced. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterState {
    pub cluster_name: String,
    pub base_domain: String,
    pub network: VirtualNetwork,
    /// Load balancer first, then the cohort in creation order.
    pub nodes: Vec<ProvisionedNode>,
}

impl ClusterState {
    pub fn load_balancer_ip(&self) -> Option<Ipv4Addr> {
        self.nodes.first().map(|n| n.lease.ip)
    }
}

/// Sequences network, load balancer and cohort provisioning.
pub struct ClusterOrchestrator<'a> {
    config: &'a ClusterConfig,
    env: ProvisionEnv<'a>,
}

impl<'a> ClusterOrchestrator<'a> {
    pub fn new(config: &'a ClusterConfig, env: ProvisionEnv<'a>) -> Self {
        Self { config, env }
    }

    pub fn ensure_network(&self) -> Result<VirtualNetwork> {
        let selector = self.config.network_selector()?;
        network::ensure_network(self.env.networks, &selector)
            .with_context(|| format!("stage {}", Stage::NetworkReady))
    }

    /// Resolver self-test against the network's gateway and the host resolver.
    pub fn check_dns(&self, net: &VirtualNetwork) -> Result<Vec<LookupOutcome>> {
        let check = ResolverCheck {
            services: self.env.services,
            files: self.env.resolver_files,
            lookup: self.env.lookup,
            sleeper: self.env.sleeper,
        };
        let outcomes = dns::check_resolver(check, self.config, net.gateway)
            .with_context(|| format!("stage {}", Stage::DnsChecked))?;
        info!(stage = %Stage::DnsChecked, network = %net.name, lookups = outcomes.len(), "DNS checked");
        Ok(outcomes)
    }

    /// Create the hosts file and resolver fragment for this cluster.
    pub fn prepare_dns(&self) -> Result<()> {
        self.env
            .hosts
            .prepare()
            .context("Failed to prepare cluster name resolution")
    }

    /// Load balancer track: customize disk, create, address, gate on SSH as root.
    pub fn provision_load_balancer(&self, net: &VirtualNetwork) -> Result<ProvisionedNode> {
        let spec = NodeSpecBuilder::new(self.config, &net.name).load_balancer();

        if let Some(custom) = &spec.customization {
            self.env
                .customizer
                .customize(&spec.disk_path, custom)
                .with_context(|| format!("stage {}: customize {}", Stage::LbCreated, spec.disk_path))?;
        }
        lifecycle::create(self.env.domains, &spec)
            .with_context(|| format!("stage {}: create {}", Stage::LbCreated, spec.name))?;
        info!(stage = %Stage::LbCreated, vm = %spec.name, "load balancer created");

        let (cluster, domain) = (&self.config.cluster_name, &self.config.base_domain);
        let fqdn = naming::fqdn(&spec.host, cluster, domain);
        let node = self
            .address(spec, fqdn, |ip| HostEntry::load_balancer(ip, cluster, domain))
            .with_context(|| format!("stage {}", Stage::LbAddressed))?;
        self.reload_resolver()
            .with_context(|| format!("stage {}", Stage::LbAddressed))?;
        info!(stage = %Stage::LbAddressed, vm = %node.spec.name, ip = %node.lease.ip, "load balancer addressed");

        self.gate_ssh(&node, &self.config.ssh.lb_user)
            .with_context(|| format!("stage {}: {}", Stage::LbReachable, node.fqdn))?;
        info!(stage = %Stage::LbReachable, vm = %node.spec.name, "load balancer reachable");
        Ok(node)
    }

    /// Cohort track: create bootstrap, masters, workers; then address each in
    /// the same role-major order; then boot each installed disk once its
    /// installer has powered off; then gate on bootstrap SSH as the node user.
    pub fn provision_cohort(
        &self,
        net: &VirtualNetwork,
        lb_ip: Ipv4Addr,
    ) -> Result<Vec<ProvisionedNode>> {
        let specs = NodeSpecBuilder::new(self.config, &net.name).cohort(lb_ip);

        for spec in &specs {
            lifecycle::create(self.env.domains, spec)
                .with_context(|| format!("stage {}: create {}", Stage::NodesCreated, spec.name))?;
        }
        info!(stage = %Stage::NodesCreated, count = specs.len(), "cohort created");

        let (cluster, domain) = (&self.config.cluster_name, &self.config.base_domain);
        let mut nodes = Vec::with_capacity(specs.len());
        for spec in specs {
            let fqdn = naming::fqdn(&spec.host, cluster, domain);
            let (name, host) = (spec.name.clone(), spec.host.clone());
            let node = self
                .address(spec, fqdn, |ip| HostEntry::node(ip, &host, cluster, domain))
                .with_context(|| format!("stage {}: {}", Stage::NodesAddressed, name))?;
            nodes.push(node);
        }
        self.reload_resolver()
            .with_context(|| format!("stage {}", Stage::NodesAddressed))?;
        info!(stage = %Stage::NodesAddressed, count = nodes.len(), "cohort addressed");

        for node in nodes.iter().filter(|n| n.spec.install.is_some()) {
            self.boot_installed(&node.spec.name)
                .with_context(|| format!("stage {}: {}", Stage::NodesInstalled, node.spec.name))?;
        }
        info!(stage = %Stage::NodesInstalled, count = nodes.len(), "cohort booted from disk");

        let bootstrap = nodes.first().ok_or_else(|| {
            ProvisionError::config("cohort has no bootstrap node")
        })?;
        self.gate_ssh(bootstrap, &self.config.ssh.node_user)
            .with_context(|| format!("stage {}: {}", Stage::BootstrapReachable, bootstrap.fqdn))?;
        info!(stage = %Stage::BootstrapReachable, vm = %bootstrap.spec.name, "bootstrap reachable");
        Ok(nodes)
    }

    /// Network, resolver self-test, name resolution, load balancer, cohort.
    pub fn provision_all(&self) -> Result<ClusterState> {
        let net = self.ensure_network()?;
        info!(stage = %Stage::NetworkReady, network = %net.name, bridge = %net.bridge, "network ready");
        if self.config.dns.check {
            self.check_dns(&net)?;
        } else {
            warn!("DNS check disabled");
        }
        self.prepare_dns()?;

        let lb = self.provision_load_balancer(&net)?;
        let cohort = self.provision_cohort(&net, lb.lease.ip)?;

        let mut nodes = vec![lb];
        nodes.extend(cohort);
        Ok(ClusterState {
            cluster_name: self.config.cluster_name.clone(),
            base_domain: self.config.base_domain.clone(),
            network: net,
            nodes,
        })
    }

    /// Start every defined cluster VM. Already running ones are skipped.
    pub fn start_cluster(&self) -> Result<Vec<String>> {
        let mut started = Vec::new();
        for name in self.defined_cluster_vms()? {
            match lifecycle::start(self.env.domains, &name) {
                Ok(()) => started.push(name),
                Err(e) if lifecycle::is_already_running(&e) => {
                    info!(vm = %name, "already running");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(started)
    }

    /// Hard-stop every defined cluster VM. Stopped ones are skipped.
    pub fn stop_cluster(&self) -> Result<Vec<String>> {
        let mut stopped = Vec::new();
        for name in self.defined_cluster_vms()? {
            match lifecycle::stop(self.env.domains, &name) {
                Ok(()) => stopped.push(name),
                Err(e) if lifecycle::is_not_running(&e) => {
                    info!(vm = %name, "not running");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(stopped)
    }

    /// Explicit cleanup: stop and undefine every cluster VM, then remove the
    /// hosts file and resolver fragment. DHCP reservations and disks stay.
    pub fn destroy_cluster(&self) -> Result<Vec<String>> {
        self.stop_cluster()?;
        let mut removed = Vec::new();
        for name in self.defined_cluster_vms()? {
            lifecycle::destroy(self.env.domains, &name)?;
            removed.push(name);
        }
        self.env
            .hosts
            .remove()
            .context("Failed to remove cluster name resolution files")?;
        Ok(removed)
    }

    fn defined_cluster_vms(&self) -> Result<Vec<String>> {
        let existing = self.env.domains.list().context("Failed to list domains")?;
        let ours = naming::cluster_vm_names(
            &self.config.cluster_name,
            self.config.masters,
            self.config.workers,
        );
        let (present, missing): (Vec<String>, Vec<String>) =
            ours.into_iter().partition(|n| existing.contains(n));
        for name in missing {
            warn!(vm = %name, "not defined, skipping");
        }
        Ok(present)
    }

    /// Wait for a lease, pin it, publish the host record.
    fn address(
        &self,
        spec: NodeSpec,
        fqdn: String,
        entry_for: impl FnOnce(Ipv4Addr) -> HostEntry,
    ) -> Result<ProvisionedNode> {
        let lease = readiness::wait_for_lease(
            self.env.domains,
            self.env.sleeper,
            &self.config.lease_policy(),
            &spec.name,
        )?;
        dhcp::reserve(self.env.networks, &spec.network, &lease)?;
        dns::publish_host(self.env.hosts, &entry_for(lease.ip), self.config.publish_mode())?;
        Ok(ProvisionedNode { spec, fqdn, lease })
    }

    /// Wait for the installer to power the VM off, then boot its disk.
    fn boot_installed(&self, name: &str) -> Result<()> {
        readiness::wait_for_shutoff(
            self.env.domains,
            self.env.sleeper,
            &self.config.install_policy(),
            name,
        )?;
        lifecycle::start(self.env.domains, name)?;
        info!(vm = %name, "booted from installed disk");
        Ok(())
    }

    fn reload_resolver(&self) -> Result<()> {
        dns::reload_resolver(
            self.env.services,
            self.env.sleeper,
            self.config.resolver_service(),
            self.config.settle_delay(),
        )
    }

    fn gate_ssh(&self, node: &ProvisionedNode, user: &str) -> Result<()> {
        let target = SshTarget {
            ip: node.lease.ip,
            hostname: node.fqdn.clone(),
            key_path: self.config.ssh.private_key.clone(),
            user: user.to_string(),
        };
        readiness::wait_for_ssh(
            self.env.ssh,
            self.env.sleeper,
            &self.config.ssh_policy(),
            &target,
        )
    }
}
