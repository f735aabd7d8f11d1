use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use ocpkvm_core::capability::DomainApi;
use ocpkvm_core::error::ProvisionError;
use ocpkvm_core::node::NodeSpec;
use ocpkvm_core::xml;

/// Create and boot a VM from its definition.
///
/// Install-time roles get an empty disk, boot the installer transiently and
/// get a persistent definition that boots from disk afterwards; the caller
/// starts that definition once the installer has powered off. Other roles
/// are defined and started. An existing VM of the same name is never touched: the hypervisor
/// rejects the duplicate and the error is returned.
pub fn create(domains: &dyn DomainApi, spec: &NodeSpec) -> Result<()> {
    info!(vm = %spec.name, role = %spec.role, cpus = spec.cpus, memory_mib = spec.memory_mib, "creating VM");

    match xml::install_domain_xml(spec) {
        Some(install) => {
            if let Some(boot) = &spec.install
                && !Path::new(&boot.location).is_absolute()
            {
                return Err(ProvisionError::config(format!(
                    "install location must be an absolute path, got {:?}",
                    boot.location
                ))
                .into());
            }
            domains
                .allocate_disk(&spec.disk_path, spec.disk_gib)
                .with_context(|| format!("Failed to allocate disk for {}", spec.name))?;
            domains
                .create_transient(&install)
                .with_context(|| format!("Failed to start installer for {}", spec.name))?;
            domains
                .define(&xml::domain_xml(spec))
                .with_context(|| format!("Failed to define {}", spec.name))?;
        }
        None => {
            domains
                .define(&xml::domain_xml(spec))
                .with_context(|| format!("Failed to define {}", spec.name))?;
            start(domains, &spec.name)?;
        }
    }

    info!(vm = %spec.name, "VM created");
    Ok(())
}

pub fn start(domains: &dyn DomainApi, name: &str) -> Result<()> {
    domains
        .start(name)
        .with_context(|| format!("Failed to start VM {}", name))
}

/// Hard power-off.
pub fn stop(domains: &dyn DomainApi, name: &str) -> Result<()> {
    domains
        .destroy(name)
        .with_context(|| format!("Failed to stop VM {}", name))
}

/// Remove the VM definition. Disk images are left in place.
pub fn destroy(domains: &dyn DomainApi, name: &str) -> Result<()> {
    domains
        .undefine(name)
        .with_context(|| format!("Failed to destroy VM {}", name))
}

fn hypervisor_detail_contains(err: &anyhow::Error, needle: &str) -> bool {
    matches!(
        err.downcast_ref::<ProvisionError>(),
        Some(ProvisionError::Hypervisor { detail, .. }) if detail.contains(needle)
    )
}

/// The hypervisor refused because the domain is already off.
pub fn is_not_running(err: &anyhow::Error) -> bool {
    hypervisor_detail_contains(err, "not running")
}

/// The hypervisor refused because the domain is already on.
pub fn is_already_running(err: &anyhow::Error) -> bool {
    hypervisor_detail_contains(err, "already active")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::FakeHypervisor;
    use ocpkvm_core::config::ClusterConfig;
    use ocpkvm_core::node::NodeSpecBuilder;
    use std::net::Ipv4Addr;

    fn install_config() -> ClusterConfig {
        let mut config = ClusterConfig::default();
        config.resolve_paths(std::path::Path::new("/srv/ocp"));
        config
    }

    #[test]
    fn test_install_role_allocates_disk_boots_installer_then_defines() {
        let hv = FakeHypervisor::default();
        let config = install_config();
        let spec = NodeSpecBuilder::new(&config, "ocp-100").master(1, Ipv4Addr::new(192, 168, 100, 10));
        create(&hv, &spec).unwrap();
        assert_eq!(
            hv.calls(),
            [
                "allocate /var/lib/libvirt/images/ocp4-master-1.qcow2 120G",
                "create ocp4-master-1",
                "define ocp4-master-1",
            ]
        );
    }

    #[test]
    fn test_relative_install_location_is_rejected_before_any_call() {
        let hv = FakeHypervisor::default();
        let config = ClusterConfig::default();
        let spec = NodeSpecBuilder::new(&config, "ocp-100").bootstrap(Ipv4Addr::new(192, 168, 100, 10));
        let err = create(&hv, &spec).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Config(_))
        ));
        assert!(hv.calls().is_empty());
    }

    #[test]
    fn test_disk_allocation_failure_skips_installer() {
        let hv = FakeHypervisor::default();
        hv.fail_on("allocate /var/lib/libvirt/images/ocp4-worker-1.qcow2 120G");
        let config = install_config();
        let spec = NodeSpecBuilder::new(&config, "ocp-100").worker(1, Ipv4Addr::new(192, 168, 100, 10));
        let err = create(&hv, &spec).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to allocate disk for ocp4-worker-1"));
        assert_eq!(hv.calls().len(), 1);
    }

    #[test]
    fn test_load_balancer_defined_then_started() {
        let hv = FakeHypervisor::default();
        let config = ClusterConfig::default();
        let spec = NodeSpecBuilder::new(&config, "ocp-100").load_balancer();
        create(&hv, &spec).unwrap();
        assert_eq!(hv.calls(), ["define ocp4-lb", "start ocp4-lb"]);
    }

    #[test]
    fn test_create_failure_is_returned() {
        let hv = FakeHypervisor::default();
        hv.fail_on("create ocp4-bootstrap");
        let config = install_config();
        let spec = NodeSpecBuilder::new(&config, "ocp-100").bootstrap(Ipv4Addr::new(192, 168, 100, 10));
        let err = create(&hv, &spec).unwrap_err();
        assert!(format!("{:#}", err).contains("ocp4-bootstrap"));
        assert_eq!(
            hv.calls(),
            [
                "allocate /var/lib/libvirt/images/ocp4-bootstrap.qcow2 120G",
                "create ocp4-bootstrap",
            ]
        );
    }

    #[test]
    fn test_stop_and_destroy_calls() {
        let hv = FakeHypervisor::default();
        stop(&hv, "ocp4-lb").unwrap();
        destroy(&hv, "ocp4-lb").unwrap();
        assert_eq!(hv.calls(), ["destroy ocp4-lb", "undefine ocp4-lb"]);
    }

    #[test]
    fn test_not_running_classification() {
        let err: anyhow::Error =
            ProvisionError::hypervisor("destroy", "error: Requested operation is not valid: domain is not running").into();
        let err = err.context("Failed to stop VM ocp4-lb");
        assert!(is_not_running(&err));
        assert!(!is_already_running(&err));
    }
}
