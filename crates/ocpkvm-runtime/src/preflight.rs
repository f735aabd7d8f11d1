use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use ocpkvm_core::capability::DomainApi;
use ocpkvm_core::config::ClusterConfig;
use ocpkvm_core::naming;

/// Host executables the provisioning pipeline shells out to.
pub const REQUIRED_TOOLS: &[&str] = &[
    "virsh",
    "virt-customize",
    "qemu-img",
    "systemctl",
    "ssh",
    "ssh-keygen",
    "dig",
];

/// What stands between this host and a clean provision.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PreflightReport {
    pub missing_tools: Vec<String>,
    pub missing_files: Vec<String>,
    /// Domains that already carry this cluster's VM names.
    pub leftover_domains: Vec<String>,
}

impl PreflightReport {
    pub fn is_ok(&self) -> bool {
        self.missing_tools.is_empty()
            && self.missing_files.is_empty()
            && self.leftover_domains.is_empty()
    }

    /// One line per problem, for error messages.
    pub fn problems(&self) -> Vec<String> {
        let mut out = Vec::new();
        for tool in &self.missing_tools {
            out.push(format!("executable '{}' not found in PATH", tool));
        }
        for file in &self.missing_files {
            out.push(format!("file '{}' not found", file));
        }
        for dom in &self.leftover_domains {
            out.push(format!(
                "domain '{}' already exists (run 'ocpkvm destroy' first)",
                dom
            ));
        }
        out
    }
}

/// Tools from `tools` that are not on PATH.
pub fn missing_executables(tools: &[&str]) -> Vec<String> {
    tools
        .iter()
        .filter(|t| which::which(t).is_err())
        .map(|t| t.to_string())
        .collect()
}

/// Existing domains whose names collide with this cluster's VMs.
pub fn leftover_domains(domains: &dyn DomainApi, config: &ClusterConfig) -> Result<Vec<String>> {
    let ours = naming::cluster_vm_names(&config.cluster_name, config.masters, config.workers);
    let existing = domains.list()?;
    Ok(ours.into_iter().filter(|n| existing.contains(n)).collect())
}

/// SSH keys and installer boot files that are not on disk.
pub fn missing_files(config: &ClusterConfig) -> Vec<String> {
    let [kernel, initrd] = config.install_files();
    [
        config.ssh.private_key.clone(),
        config.lb_ssh_pub_key(),
        kernel.to_string_lossy().into_owned(),
        initrd.to_string_lossy().into_owned(),
    ]
    .into_iter()
    .filter(|f| !Path::new(f).exists())
    .collect()
}

/// Run every check.
pub fn run(config: &ClusterConfig, domains: &dyn DomainApi) -> Result<PreflightReport> {
    let missing_tools = missing_executables(REQUIRED_TOOLS);
    let missing_files = missing_files(config);
    // Without virsh there is nothing to list.
    let leftover_domains = if missing_tools.iter().any(|t| t == "virsh") {
        Vec::new()
    } else {
        leftover_domains(domains, config)?
    };
    Ok(PreflightReport {
        missing_tools,
        missing_files,
        leftover_domains,
    })
}
