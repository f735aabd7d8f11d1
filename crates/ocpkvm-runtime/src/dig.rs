use std::net::Ipv4Addr;

use anyhow::Result;
use tracing::debug;

use ocpkvm_core::capability::DnsLookup;

use crate::shell;

/// DNS queries through `dig +short`.
pub struct Dig;

/// `dig` arguments for a query, optionally pinned to `server`.
pub fn query_args(query: &[&str], server: Option<Ipv4Addr>) -> Vec<String> {
    let mut args = vec!["+short".to_string()];
    if let Some(server) = server {
        args.push(format!("@{}", server));
    }
    args.extend(query.iter().map(|q| q.to_string()));
    args
}

fn run(query: &[&str], server: Option<Ipv4Addr>) -> Result<Vec<String>> {
    let args = query_args(query, server);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let out = shell::run_host_checked("dig", &args)?;
    let answers: Vec<String> = out
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with(';'))
        .map(str::to_string)
        .collect();
    debug!(query = %query.join(" "), ?server, ?answers, "dig");
    Ok(answers)
}

impl DnsLookup for Dig {
    fn forward(&self, name: &str, server: Option<Ipv4Addr>) -> Result<Vec<String>> {
        run(&[name], server)
    }

    fn reverse(&self, ip: Ipv4Addr, server: Option<Ipv4Addr>) -> Result<Vec<String>> {
        let ip = ip.to_string();
        run(&["-x", &ip], server)
    }
}
