use anyhow::Result;
use tracing::debug;

use ocpkvm_core::capability::{SshProber, SshTarget};

use crate::shell;

/// SSH reachability via the OpenSSH client.
pub struct OpenSsh;

/// Arguments for a non-interactive `true` over SSH.
pub fn probe_args(target: &SshTarget) -> Vec<String> {
    vec![
        "-i".to_string(),
        target.key_path.clone(),
        "-o".to_string(),
        "StrictHostKeyChecking=no".to_string(),
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        "ConnectTimeout=10".to_string(),
        format!("{}@{}", target.user, target.ip),
        "true".to_string(),
    ]
}

impl SshProber for OpenSsh {
    fn forget_host_key(&self, host: &str) -> Result<()> {
        // Exits non-zero when known_hosts does not exist yet; nothing to forget then.
        if !shell::run_host_status("ssh-keygen", &["-R", host])? {
            debug!(host, "no cached host key");
        }
        Ok(())
    }

    fn probe(&self, target: &SshTarget) -> Result<bool> {
        let args = probe_args(target);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        shell::run_host_status("ssh", &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell_mock::{self, MockResponse};
    use std::net::Ipv4Addr;

    fn target() -> SshTarget {
        SshTarget {
            ip: Ipv4Addr::new(192, 168, 100, 10),
            hostname: "lb.ocp4.local".to_string(),
            key_path: "sshkey".to_string(),
            user: "root".to_string(),
        }
    }

    #[test]
    fn test_probe_command() {
        let (_guard, calls) = shell_mock::install(|_| MockResponse::empty());
        assert!(OpenSsh.probe(&target()).unwrap());
        assert_eq!(
            calls.lock().unwrap()[0],
            "ssh -i sshkey -o StrictHostKeyChecking=no -o BatchMode=yes \
             -o ConnectTimeout=10 root@192.168.100.10 true"
        );
    }

    #[test]
    fn test_probe_unreachable_is_not_an_error() {
        let (_guard, _calls) = shell_mock::install(|_| {
            MockResponse::fail(255, "", "ssh: connect to host 192.168.100.10 port 22: No route to host")
        });
        assert!(!OpenSsh.probe(&target()).unwrap());
    }

    #[test]
    fn test_forget_host_key_tolerates_missing_known_hosts() {
        let (_guard, calls) = shell_mock::install(|_| MockResponse::fail(255, "", "do_known_hosts"));
        OpenSsh.forget_host_key("lb.ocp4.local").unwrap();
        assert_eq!(calls.lock().unwrap()[0], "ssh-keygen -R lb.ocp4.local");
    }
}
