use anyhow::Result;
use tracing::info;

use ocpkvm_core::capability::ServiceController;

use crate::shell;

/// Service controller backed by `systemctl`.
pub struct Systemctl;

impl Systemctl {
    fn verb(&self, verb: &str, service: &str) -> Result<()> {
        shell::run_host_checked("systemctl", &[verb, service])?;
        info!(service, action = verb, "service updated");
        Ok(())
    }
}

impl ServiceController for Systemctl {
    fn is_active(&self, service: &str) -> Result<bool> {
        // is-active exits non-zero for inactive, failed and unknown units.
        shell::run_host_status("systemctl", &["is-active", "--quiet", service])
    }

    fn restart(&self, service: &str) -> Result<()> {
        self.verb("restart", service)
    }

    fn reload(&self, service: &str) -> Result<()> {
        self.verb("reload", service)
    }
}
