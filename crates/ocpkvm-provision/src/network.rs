use anyhow::{Context, Result};
use tracing::{info, warn};

use ocpkvm_core::capability::NetworkApi;
use ocpkvm_core::error::ProvisionError;
use ocpkvm_core::network::{DhcpScope, NetworkSelector, VirtualNetwork};
use ocpkvm_core::xml;

/// Resolve the two mutually exclusive inputs and ensure the network.
///
/// Both-or-neither fails as a configuration error before `api` is touched.
pub fn ensure(
    api: &dyn NetworkApi,
    octet: Option<&str>,
    existing: Option<&str>,
) -> Result<VirtualNetwork> {
    let selector = NetworkSelector::resolve(octet, existing)?;
    ensure_network(api, &selector)
}

/// Make sure the selected network exists and is started, then read its
/// bridge device and gateway.
///
/// An octet network that already exists is reused as-is; its DHCP range is
/// not reconciled. A network found by lookup must already be started.
pub fn ensure_network(api: &dyn NetworkApi, selector: &NetworkSelector) -> Result<VirtualNetwork> {
    let name = selector.network_name();

    let created = match selector {
        NetworkSelector::Octet(octet) => {
            if api.exists(&name)? {
                info!(network = %name, "network already exists, reusing it");
                require_active(api, &name)?;
                false
            } else {
                create(api, &name, *octet)?;
                true
            }
        }
        NetworkSelector::Existing(_) => {
            if !api.exists(&name)? {
                return Err(ProvisionError::hypervisor(
                    "net-lookup",
                    format!("libvirt network {} doesn't exist", name),
                )
                .into());
            }
            require_active(api, &name)?;
            info!(network = %name, "using existing network");
            false
        }
    };

    let bridge = api
        .bridge_name(&name)
        .with_context(|| format!("Failed to get bridge for network {}", name))?;

    let descriptor = api
        .dump_xml(&name)
        .with_context(|| format!("Failed to get descriptor for network {}", name))?;
    let gateway = xml::parse_gateway(&descriptor);
    if gateway.is_none() {
        warn!(network = %name, "no gateway address in network descriptor");
    }

    Ok(VirtualNetwork {
        name,
        bridge,
        gateway,
        created,
    })
}

fn require_active(api: &dyn NetworkApi, name: &str) -> Result<()> {
    if !api.is_active(name)? {
        return Err(ProvisionError::hypervisor(
            "net-lookup",
            format!("libvirt network {} is defined but not started", name),
        )
        .into());
    }
    Ok(())
}

fn create(api: &dyn NetworkApi, name: &str, octet: u8) -> Result<()> {
    let scope = DhcpScope::from_octet(octet);
    info!(
        network = %name,
        gateway = %scope.gateway,
        range_start = %scope.range_start,
        range_end = %scope.range_end,
        "creating network"
    );
    api.define(&xml::network_xml(name, &scope))
        .with_context(|| format!("Failed to define network {}", name))?;
    api.set_autostart(name)
        .with_context(|| format!("Failed to set autostart on network {}", name))?;
    api.start(name)
        .with_context(|| format!("Failed to start network {}", name))?;
    info!(network = %name, "network created and started");
    Ok(())
}
