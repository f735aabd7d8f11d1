use std::net::Ipv4Addr;

use anyhow::Result;
use serde::Serialize;

use crate::error::ProvisionError;
use crate::naming;

/// Which libvirt network the cluster lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkSelector {
    /// Create (or reuse) "ocp-<octet>" with a 192.168.<octet>.0/24 scope.
    Octet(u8),
    /// Reuse an existing, already started network.
    Existing(String),
}

impl NetworkSelector {
    /// Build a selector from the two mutually exclusive inputs.
    ///
    /// Empty strings count as absent. Exactly one input must be present.
    pub fn resolve(octet: Option<&str>, existing: Option<&str>) -> Result<Self> {
        let octet = octet.map(str::trim).filter(|s| !s.is_empty());
        let existing = existing.map(str::trim).filter(|s| !s.is_empty());

        match (octet, existing) {
            (Some(_), Some(_)) => Err(ProvisionError::config(
                "specify either a libvirt network name or a network octet, not both",
            )
            .into()),
            (None, None) => Err(ProvisionError::config(
                "either a libvirt network name or a network octet is required",
            )
            .into()),
            (Some(oct), None) => {
                let value: u8 = oct.parse().map_err(|_| {
                    ProvisionError::config(format!("network octet must be 0-255, got {:?}", oct))
                })?;
                Ok(Self::Octet(value))
            }
            (None, Some(name)) => Ok(Self::Existing(name.to_string())),
        }
    }

    /// Libvirt network name this selector refers to.
    pub fn network_name(&self) -> String {
        match self {
            Self::Octet(octet) => naming::network_name(*octet),
            Self::Existing(name) => name.clone(),
        }
    }
}

/// DHCP scope derived from an octet: gateway .1, pool .2 - .254, /24.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DhcpScope {
    pub gateway: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub range_start: Ipv4Addr,
    pub range_end: Ipv4Addr,
}

impl DhcpScope {
    pub fn from_octet(octet: u8) -> Self {
        Self {
            gateway: Ipv4Addr::new(192, 168, octet, 1),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            range_start: Ipv4Addr::new(192, 168, octet, 2),
            range_end: Ipv4Addr::new(192, 168, octet, 254),
        }
    }
}

/// A resolved, started libvirt network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualNetwork {
    pub name: String,
    pub bridge: String,
    /// Absent when the network descriptor carries no `<ip address=..>`.
    pub gateway: Option<Ipv4Addr>,
    /// True when this run defined and started the network.
    pub created: bool,
}
