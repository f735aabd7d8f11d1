use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use ocpkvm_core::capability::{DomainApi, NetworkApi};
use ocpkvm_core::error::ProvisionError;
use ocpkvm_core::lease::{self, InterfaceAddress};

use crate::shell;

/// libvirt backend driven through the `virsh` CLI.
pub struct Virsh {
    uri: String,
}

impl Virsh {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
        }
    }

    /// Run `virsh -c <uri> <args..>`. Non-zero exit is a hypervisor error
    /// tagged with `operation`.
    fn run(&self, operation: &str, args: &[&str]) -> Result<String> {
        let mut full = vec!["-c", self.uri.as_str()];
        full.extend_from_slice(args);
        debug!(cmd = %shell::command_line("virsh", &full), "virsh");

        let output = shell::run_host("virsh", &full)?;
        if !output.status.success() {
            return Err(
                ProvisionError::hypervisor(operation, shell::combined_output(&output)).into(),
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a virsh subcommand whose last argument is a file holding `xml`.
    /// The temp file lives until the command has returned.
    fn run_with_xml(&self, operation: &str, subcommand: &str, xml: &str) -> Result<String> {
        let mut file = tempfile::Builder::new()
            .prefix("ocpkvm-")
            .suffix(".xml")
            .tempfile()
            .context("Failed to create temp file for libvirt XML")?;
        file.write_all(xml.as_bytes())
            .context("Failed to write libvirt XML")?;
        file.flush()?;

        let path = file.path().to_string_lossy().into_owned();
        self.run(operation, &[subcommand, &path])
    }

    fn net_info(&self, name: &str) -> Result<String> {
        self.run("net-info", &["net-info", name])
    }
}

/// Value of `key` in `virsh net-info` / `dominfo` style "Key:   value" output.
pub fn info_field<'a>(output: &'a str, key: &str) -> Option<&'a str> {
    output.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        (k.trim() == key).then(|| v.trim())
    })
}

fn is_not_found(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<ProvisionError>() {
        Some(ProvisionError::Hypervisor { detail, .. }) => {
            let detail = detail.to_lowercase();
            detail.contains("not found") || detail.contains("no network with matching name")
        }
        _ => false,
    }
}

impl NetworkApi for Virsh {
    fn exists(&self, name: &str) -> Result<bool> {
        match self.net_info(name) {
            Ok(_) => Ok(true),
            Err(e) if is_not_found(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn is_active(&self, name: &str) -> Result<bool> {
        let info = self.net_info(name)?;
        Ok(info_field(&info, "Active") == Some("yes"))
    }

    #[instrument(skip(self, xml))]
    fn define(&self, xml: &str) -> Result<()> {
        self.run_with_xml("net-define", "net-define", xml)?;
        Ok(())
    }

    fn set_autostart(&self, name: &str) -> Result<()> {
        self.run("net-autostart", &["net-autostart", name])?;
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        self.run("net-start", &["net-start", name])?;
        Ok(())
    }

    fn bridge_name(&self, name: &str) -> Result<String> {
        let info = self.net_info(name)?;
        match info_field(&info, "Bridge") {
            Some(bridge) if !bridge.is_empty() => Ok(bridge.to_string()),
            _ => Err(ProvisionError::hypervisor(
                "net-info",
                format!("network {} reports no bridge device", name),
            )
            .into()),
        }
    }

    fn dump_xml(&self, name: &str) -> Result<String> {
        self.run("net-dumpxml", &["net-dumpxml", name])
    }

    #[instrument(skip(self))]
    fn add_dhcp_host(&self, name: &str, host_xml: &str) -> Result<()> {
        self.run(
            "net-update",
            &[
                "net-update",
                name,
                "add-last",
                "ip-dhcp-host",
                host_xml,
                "--live",
                "--config",
            ],
        )?;
        Ok(())
    }
}

impl DomainApi for Virsh {
    #[instrument(skip(self, xml))]
    fn define(&self, xml: &str) -> Result<()> {
        self.run_with_xml("define", "define", xml)?;
        Ok(())
    }

    #[instrument(skip(self, xml))]
    fn create_transient(&self, xml: &str) -> Result<()> {
        self.run_with_xml("create", "create", xml)?;
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        self.run("start", &["start", name])?;
        Ok(())
    }

    fn destroy(&self, name: &str) -> Result<()> {
        self.run("destroy", &["destroy", name])?;
        Ok(())
    }

    fn undefine(&self, name: &str) -> Result<()> {
        self.run("undefine", &["undefine", name])?;
        Ok(())
    }

    fn is_running(&self, name: &str) -> Result<bool> {
        let state = self.run("domstate", &["domstate", name])?;
        Ok(!matches!(state.as_str(), "shut off" | "crashed"))
    }

    fn allocate_disk(&self, path: &str, size_gib: u32) -> Result<()> {
        if Path::new(path).exists() {
            debug!(path, "disk already present");
            return Ok(());
        }
        let size = format!("{}G", size_gib);
        shell::run_host_checked("qemu-img", &["create", "-f", "qcow2", path, &size])
            .with_context(|| format!("Failed to allocate disk {}", path))?;
        info!(path, size_gib, "disk allocated");
        Ok(())
    }

    fn interface_addresses(&self, name: &str) -> Result<Vec<InterfaceAddress>> {
        let out = self.run("domifaddr", &["domifaddr", name, "--source", "lease"])?;
        Ok(lease::parse_domifaddr(&out))
    }

    fn list(&self) -> Result<Vec<String>> {
        let out = self.run("list", &["list", "--all", "--name"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}
