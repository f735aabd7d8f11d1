// ocpkvm-runtime: Shell execution and host backends (libvirt, systemd, ssh, dig, guestfs)
// Depends on ocpkvm-core

pub mod customize;
pub mod dig;
pub mod haproxy;
pub mod hosts;
pub mod preflight;
pub mod shell;
#[cfg(test)]
pub mod shell_mock;
pub mod ssh;
pub mod systemd;
pub mod virsh;
