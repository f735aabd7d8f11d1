// ocpkvm-core: Pure types, config, naming, libvirt definitions
// No internal ocpkvm dependencies; this is the foundation crate.

pub mod capability;
pub mod config;
pub mod dnscheck;
pub mod error;
pub mod hosts;
pub mod lease;
pub mod naming;
pub mod network;
pub mod node;
pub mod retry;
pub mod xml;
