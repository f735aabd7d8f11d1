use std::path::Path;

use anyhow::{Context, Result};

use ocpkvm_core::config::ClusterConfig;
use ocpkvm_core::naming;
use ocpkvm_core::node::Role;

const TEMPLATE: &str = include_str!("../resources/haproxy.cfg.tera");

/// Render the load balancer's haproxy.cfg.
///
/// API and machine-config traffic go to bootstrap plus masters; ingress goes
/// to workers, or to masters on a cluster without workers.
pub fn render(config: &ClusterConfig) -> Result<String> {
    let node = |role: Role, ordinal: u32| {
        naming::fqdn(
            &naming::host_label(role, ordinal),
            &config.cluster_name,
            &config.base_domain,
        )
    };
    let masters: Vec<String> = (1..=config.masters).map(|i| node(Role::Master, i)).collect();
    let workers: Vec<String> = (1..=config.workers).map(|i| node(Role::Worker, i)).collect();

    let mut control_plane = vec![node(Role::Bootstrap, 0)];
    control_plane.extend(masters.iter().cloned());
    let ingress = if workers.is_empty() { masters } else { workers };

    let mut tera = tera::Tera::default();
    tera.add_raw_template("haproxy.cfg", TEMPLATE)
        .map_err(|e| anyhow::anyhow!("Failed to parse haproxy template: {}", e))?;

    let mut ctx = tera::Context::new();
    ctx.insert("cluster_name", &config.cluster_name);
    ctx.insert("base_domain", &config.base_domain);
    ctx.insert("control_plane", &control_plane);
    ctx.insert("ingress", &ingress);

    tera.render("haproxy.cfg", &ctx)
        .map_err(|e| anyhow::anyhow!("Failed to render haproxy template: {}", e))
}

/// Render and write haproxy.cfg to `path`.
pub fn write_config(config: &ClusterConfig, path: &Path) -> Result<()> {
    let rendered = render(config)?;
    std::fs::write(path, rendered)
        .with_context(|| format!("Failed to write {}", path.display()))
}
