use anyhow::{Context, Result};
use tracing::info;

use ocpkvm_core::capability::ImageCustomizer;
use ocpkvm_core::node::Customization;

use crate::shell;

/// Offline image changes through libguestfs `virt-customize`.
pub struct VirtCustomize;

/// Argument list for customizing `image`.
pub fn build_args(image: &str, c: &Customization) -> Vec<String> {
    let mut args = vec![
        "-a".to_string(),
        image.to_string(),
        "--ssh-inject".to_string(),
        format!("root:file:{}", c.ssh_pub_key),
    ];
    if !c.install.is_empty() {
        args.push("--install".to_string());
        args.push(c.install.join(","));
    }
    if !c.uninstall.is_empty() {
        args.push("--uninstall".to_string());
        args.push(c.uninstall.join(","));
    }
    for mapping in &c.copy_in {
        args.push("--copy-in".to_string());
        args.push(mapping.clone());
    }
    if c.selinux_relabel {
        args.push("--selinux-relabel".to_string());
    }
    for cmd in &c.run_commands {
        args.push("--run-command".to_string());
        args.push(cmd.clone());
    }
    args
}

impl ImageCustomizer for VirtCustomize {
    fn customize(&self, image: &str, customization: &Customization) -> Result<()> {
        info!(image, "customizing disk image");
        let args = build_args(image, customization);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        shell::run_host_checked("virt-customize", &args)
            .with_context(|| format!("Failed to customize {}", image))?;
        Ok(())
    }
}
