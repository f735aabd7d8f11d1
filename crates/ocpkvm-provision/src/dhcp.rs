use anyhow::{Context, Result};
use tracing::info;

use ocpkvm_core::capability::NetworkApi;
use ocpkvm_core::lease::LeaseRecord;
use ocpkvm_core::xml;

/// Pin an observed lease as a static DHCP host entry on the network.
///
/// One management call updates the live and persistent configuration.
/// Duplicate reservations for the same MAC are left to the hypervisor.
pub fn reserve(api: &dyn NetworkApi, network: &str, lease: &LeaseRecord) -> Result<()> {
    let host = xml::dhcp_host_xml(&lease.mac, lease.ip);
    api.add_dhcp_host(network, &host).with_context(|| {
        format!(
            "Failed to add DHCP reservation for MAC {} and IP {}",
            lease.mac, lease.ip
        )
    })?;
    info!(network, vm = %lease.vm_name, mac = %lease.mac, ip = %lease.ip, "DHCP reservation added");
    Ok(())
}
