use anyhow::{Context, Result};
use tracing::info;

use ocpkvm_core::capability::{DomainApi, SshProber, SshTarget};
use ocpkvm_core::lease::{self, LeaseRecord};
use ocpkvm_core::retry::{Poll, PollPolicy, Sleeper, poll_until};

/// Wait until the VM holds a DHCP lease with an IPv4 address and a MAC.
///
/// "No lease yet" is retried; a failed hypervisor query aborts at once.
pub fn wait_for_lease(
    domains: &dyn DomainApi,
    sleeper: &dyn Sleeper,
    policy: &PollPolicy,
    vm_name: &str,
) -> Result<LeaseRecord> {
    info!(vm = %vm_name, "waiting for DHCP lease");
    let label = format!("lease for {}", vm_name);
    let record = poll_until(policy, sleeper, &label, |_| {
        let addrs = domains
            .interface_addresses(vm_name)
            .with_context(|| format!("Failed to query interface addresses of {}", vm_name))?;
        Ok(match lease::select_lease(vm_name, &addrs) {
            Some(record) => Poll::Ready(record),
            None => Poll::Pending,
        })
    })?;
    info!(vm = %vm_name, ip = %record.ip, mac = %record.mac, "lease obtained");
    Ok(record)
}

/// Wait until an install-time VM has powered itself off.
///
/// The installer reboots when it is done writing the disk, and the
/// install-time definition turns that reboot into a power-off.
pub fn wait_for_shutoff(
    domains: &dyn DomainApi,
    sleeper: &dyn Sleeper,
    policy: &PollPolicy,
    vm_name: &str,
) -> Result<()> {
    info!(vm = %vm_name, "waiting for installer to finish");
    let label = format!("install of {}", vm_name);
    poll_until(policy, sleeper, &label, |_| {
        let running = domains
            .is_running(vm_name)
            .with_context(|| format!("Failed to query state of {}", vm_name))?;
        Ok(if running { Poll::Pending } else { Poll::Ready(()) })
    })?;
    info!(vm = %vm_name, "installer finished");
    Ok(())
}

/// Wait until a non-interactive SSH command succeeds against the target.
///
/// Cached host keys for both the IP and the host name are purged first so a
/// reused address does not trip host-key verification.
pub fn wait_for_ssh(
    ssh: &dyn SshProber,
    sleeper: &dyn Sleeper,
    policy: &PollPolicy,
    target: &SshTarget,
) -> Result<()> {
    ssh.forget_host_key(&target.ip.to_string())?;
    ssh.forget_host_key(&target.hostname)?;

    info!(host = %target.hostname, ip = %target.ip, user = %target.user, "waiting for SSH");
    let label = format!("ssh to {} ({})", target.hostname, target.ip);
    poll_until(policy, sleeper, &label, |_| {
        Ok(if ssh.probe(target)? {
            Poll::Ready(())
        } else {
            Poll::Pending
        })
    })?;
    info!(host = %target.hostname, "SSH access established");
    Ok(())
}
