//! # ocpkvm: OpenShift UPI clusters on KVM via libvirt
//!
//! Facade crate that re-exports the ocpkvm workspace crates so consumers
//! can depend on a single `ocpkvm` library.
//!
//! ## Crate breakdown
//!
//! | Module | Crate | Purpose |
//! |--------|-------|---------|
//! | [`core`] | ocpkvm-core | Config, naming, node specs, libvirt XML, capability traits |
//! | [`runtime`] | ocpkvm-runtime | Shell execution, virsh, systemctl, ssh, virt-customize backends |
//! | [`provision`] | ocpkvm-provision | Network, lifecycle, readiness, DHCP, DNS, orchestrator |
//! | [`cli`] | ocpkvm-cli | Command tree, logging, terminal UI |

pub use ocpkvm_cli as cli;
pub use ocpkvm_core as core;
pub use ocpkvm_provision as provision;
pub use ocpkvm_runtime as runtime;
