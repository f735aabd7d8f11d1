use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use ocpkvm_core::capability::{DnsLookup, HostsStore, ResolverFiles, ServiceController};
use ocpkvm_core::config::{ClusterConfig, LIBVIRT_NETWORK_SERVICE};
use ocpkvm_core::dnscheck::{self, LookupCase, LookupKind};
use ocpkvm_core::error::ProvisionError;
use ocpkvm_core::hosts::{HostEntry, PublishMode, ResolverService};
use ocpkvm_core::retry::Sleeper;

/// Add a host record to the cluster's hosts file.
pub fn publish_host(store: &dyn HostsStore, entry: &HostEntry, mode: PublishMode) -> Result<()> {
    store
        .publish(entry, mode)
        .with_context(|| format!("Failed to publish host record '{}'", entry.to_line()))
}

/// Restart the resolver, let it settle, then restart libvirt's network daemon.
pub fn reload_resolver(
    services: &dyn ServiceController,
    sleeper: &dyn Sleeper,
    resolver: ResolverService,
    settle: Duration,
) -> Result<()> {
    let unit = resolver.unit();
    services
        .restart(unit)
        .with_context(|| format!("Failed to restart DNS service {}", unit))?;

    sleeper.sleep(settle);

    services
        .restart(LIBVIRT_NETWORK_SERVICE)
        .with_context(|| format!("Failed to restart {} service", LIBVIRT_NETWORK_SERVICE))?;
    info!(resolver = unit, "name resolution reloaded");
    Ok(())
}

/// The resolver daemon must be running before anything is asked of it.
pub fn require_active(services: &dyn ServiceController, resolver: ResolverService) -> Result<()> {
    let unit = resolver.unit();
    if !services
        .is_active(unit)
        .with_context(|| format!("Failed to query DNS service {}", unit))?
    {
        return Err(ProvisionError::config(format!("DNS service {} is not active", unit)).into());
    }
    Ok(())
}

/// The host must resolve through the local dnsmasq, or cluster names
/// published into it are invisible to the host.
pub fn require_local_nameserver(files: &dyn ResolverFiles) -> Result<()> {
    let conf = files.resolv_conf()?;
    match dnscheck::first_nameserver(&conf) {
        Some(addr) if dnscheck::is_local_nameserver(addr) => {
            info!(nameserver = addr, "host resolves through local dnsmasq");
            Ok(())
        }
        Some(addr) => Err(ProvisionError::config(format!(
            "first nameserver in resolv.conf is {}, not a 127.x address",
            addr
        ))
        .into()),
        None => Err(ProvisionError::config("resolv.conf lists no nameserver").into()),
    }
}

/// Fail if any name this cluster will publish already resolves locally or
/// appears in the system hosts file.
pub fn check_conflicts(
    lookup: &dyn DnsLookup,
    files: &dyn ResolverFiles,
    config: &ClusterConfig,
) -> Result<()> {
    let (cluster, domain) = (&config.cluster_name, &config.base_domain);
    let mut conflicts = Vec::new();
    for name in dnscheck::reserved_names(cluster, domain, config.masters, config.workers) {
        let answer = lookup.forward(&name, Some(dnscheck::LOCAL_RESOLVER))?;
        if !answer.is_empty() {
            conflicts.push(format!("{} resolves to {}", name, answer.join(",")));
        }
    }
    for line in dnscheck::hosts_conflicts(&files.system_hosts()?, cluster, domain) {
        conflicts.push(format!("system hosts file has '{}'", line));
    }
    if !conflicts.is_empty() {
        return Err(ProvisionError::config(format!(
            "leftover DNS records for {}.{}: {}",
            cluster,
            domain,
            conflicts.join("; ")
        ))
        .into());
    }
    info!(cluster = %cluster, "no conflicting DNS records");
    Ok(())
}

/// Make the resolver pick up changed files: NetworkManager is reloaded,
/// a standalone dnsmasq restarted. Libvirt's network daemon follows after
/// the settle delay.
pub fn refresh_resolver(
    services: &dyn ServiceController,
    sleeper: &dyn Sleeper,
    resolver: ResolverService,
    settle: Duration,
) -> Result<()> {
    let unit = resolver.unit();
    let refreshed = match resolver {
        ResolverService::NetworkManager => services.reload(unit),
        ResolverService::Dnsmasq => services.restart(unit),
    };
    refreshed.with_context(|| format!("Failed to refresh DNS service {}", unit))?;

    sleeper.sleep(settle);

    services
        .restart(LIBVIRT_NETWORK_SERVICE)
        .with_context(|| format!("Failed to restart {} service", LIBVIRT_NETWORK_SERVICE))?;
    Ok(())
}

/// One answered self-test query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LookupOutcome {
    pub kind: LookupKind,
    pub query: String,
    /// Server address, or "default" for the host resolver.
    pub server: String,
    pub answer: String,
}

fn server_label(server: Option<Ipv4Addr>) -> String {
    server.map_or_else(|| "default".to_string(), |ip| ip.to_string())
}

/// Run every case against every server. The first wrong answer aborts.
pub fn run_lookups(
    lookup: &dyn DnsLookup,
    cases: &[LookupCase],
    servers: &[Option<Ipv4Addr>],
) -> Result<Vec<LookupOutcome>> {
    let mut outcomes = Vec::with_capacity(cases.len() * servers.len());
    for &server in servers {
        for case in cases {
            let answer = match case.kind {
                LookupKind::Forward | LookupKind::Wildcard => lookup.forward(&case.query, server)?,
                LookupKind::Reverse => {
                    let ip: Ipv4Addr = case.query.parse().map_err(|_| {
                        ProvisionError::config(format!("reverse query {} is not IPv4", case.query))
                    })?;
                    lookup.reverse(ip, server)?
                }
            };
            if !answer.iter().any(|a| *a == case.expected) {
                return Err(ProvisionError::Resolution {
                    kind: case.kind.to_string(),
                    query: case.query.clone(),
                    server: server_label(server),
                    expected: case.expected.clone(),
                    answer,
                }
                .into());
            }
            info!(kind = %case.kind, query = %case.query, server = %server_label(server), "lookup ok");
            outcomes.push(LookupOutcome {
                kind: case.kind,
                query: case.query.clone(),
                server: server_label(server),
                answer: case.expected.clone(),
            });
        }
    }
    Ok(outcomes)
}

/// Host-side resolver backends used by [`check_resolver`].
#[derive(Clone, Copy)]
pub struct ResolverCheck<'a> {
    pub services: &'a dyn ServiceController,
    pub files: &'a dyn ResolverFiles,
    pub lookup: &'a dyn DnsLookup,
    pub sleeper: &'a dyn Sleeper,
}

/// Prove that names published for this cluster will resolve on the host and
/// from the network's gateway.
///
/// Prerequisites are checked first and nothing is written if one fails.
/// The test records are always removed again, and the resolver refreshed,
/// whether the lookups passed or not.
pub fn check_resolver(
    check: ResolverCheck<'_>,
    config: &ClusterConfig,
    gateway: Option<Ipv4Addr>,
) -> Result<Vec<LookupOutcome>> {
    let gateway = gateway.ok_or_else(|| {
        ProvisionError::config("network has no gateway address to query for the DNS check")
    })?;
    let resolver = config.resolver_service();

    require_active(check.services, resolver)?;
    require_local_nameserver(check.files)?;
    if config.dns.upsert {
        info!("upsert mode, existing cluster records are expected");
    } else {
        check_conflicts(check.lookup, check.files, config)?;
    }

    check
        .files
        .install_test_records(&config.cluster_name, &config.base_domain)
        .context("Failed to write DNS test records")?;

    let tested = refresh_resolver(check.services, check.sleeper, resolver, config.settle_delay())
        .and_then(|()| {
            let cases = dnscheck::lookup_cases(&config.cluster_name, &config.base_domain);
            run_lookups(check.lookup, &cases, &[Some(gateway), None])
        });

    let cleaned = check
        .files
        .remove_test_records()
        .context("Failed to remove DNS test records")
        .and_then(|()| {
            refresh_resolver(check.services, check.sleeper, resolver, config.settle_delay())
        });

    match (tested, cleaned) {
        (Ok(outcomes), Ok(())) => {
            info!(gateway = %gateway, lookups = outcomes.len(), "DNS check passed");
            Ok(outcomes)
        }
        (Ok(_), Err(e)) => Err(e),
        (Err(e), cleanup) => {
            if let Err(cleanup_err) = cleanup {
                warn!(error = %format!("{:#}", cleanup_err), "DNS test cleanup failed");
            }
            Err(e)
        }
    }
}
