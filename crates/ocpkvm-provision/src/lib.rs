// ocpkvm-provision: Cluster provisioning pipeline
// Depends on ocpkvm-core only; host backends arrive through capability traits.

pub mod dhcp;
pub mod dns;
pub mod lifecycle;
pub mod network;
pub mod orchestrator;
pub mod readiness;

#[cfg(test)]
pub(crate) mod fakes;
