use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use ocpkvm_core::capability::{HostsStore, ResolverFiles};
use ocpkvm_core::config::ClusterConfig;
use ocpkvm_core::dnscheck;
use ocpkvm_core::hosts::{self, HostEntry, PublishMode};

/// Cluster hosts file plus the resolver fragment that loads it.
pub struct FileHostsStore {
    hosts_path: PathBuf,
    fragment_path: PathBuf,
}

impl FileHostsStore {
    pub fn new(hosts_path: impl Into<PathBuf>, fragment_path: impl Into<PathBuf>) -> Self {
        Self {
            hosts_path: hosts_path.into(),
            fragment_path: fragment_path.into(),
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.hosts_path(), config.resolver_fragment_path())
    }

    pub fn hosts_path(&self) -> &Path {
        &self.hosts_path
    }

    pub fn fragment_path(&self) -> &Path {
        &self.fragment_path
    }
}

impl FileHostsStore {
    /// Append one line without touching the bytes already in the file.
    fn append_line(&self, line: &str) -> Result<()> {
        if !self.hosts_path.exists() {
            warn!(path = %self.hosts_path.display(), "hosts file missing, creating it");
        }
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.hosts_path)
            .with_context(|| format!("Failed to open {}", self.hosts_path.display()))?;

        let mut record = String::new();
        if file.metadata()?.len() > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1))?;
            file.read_exact(&mut last)?;
            if last[0] != b'\n' {
                record.push('\n');
            }
        }
        record.push_str(line);
        record.push('\n');
        file.write_all(record.as_bytes())
            .with_context(|| format!("Failed to append to {}", self.hosts_path.display()))
    }

    fn rewrite_with(&self, entry: &HostEntry) -> Result<()> {
        let existing = match fs::read_to_string(&self.hosts_path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %self.hosts_path.display(), "hosts file missing, creating it");
                String::new()
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.hosts_path.display()));
            }
        };
        let updated = hosts::apply(&existing, entry, PublishMode::Upsert);
        fs::write(&self.hosts_path, updated)
            .with_context(|| format!("Failed to write {}", self.hosts_path.display()))
    }
}

pub const RESOLV_CONF: &str = "/etc/resolv.conf";
pub const SYSTEM_HOSTS: &str = "/etc/hosts";

/// Resolver files on the local host, plus the throwaway test records.
pub struct HostResolverFiles {
    resolv_conf: PathBuf,
    system_hosts: PathBuf,
    test_hosts: PathBuf,
    test_fragment: PathBuf,
}

impl HostResolverFiles {
    pub fn new(
        resolv_conf: impl Into<PathBuf>,
        system_hosts: impl Into<PathBuf>,
        test_hosts: impl Into<PathBuf>,
        test_fragment: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolv_conf: resolv_conf.into(),
            system_hosts: system_hosts.into(),
            test_hosts: test_hosts.into(),
            test_fragment: test_fragment.into(),
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(
            RESOLV_CONF,
            SYSTEM_HOSTS,
            config.dns_test_hosts_path(),
            config.dns_test_fragment_path(),
        )
    }
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

impl ResolverFiles for HostResolverFiles {
    fn resolv_conf(&self) -> Result<String> {
        read(&self.resolv_conf)
    }

    fn system_hosts(&self) -> Result<String> {
        read(&self.system_hosts)
    }

    fn install_test_records(&self, cluster: &str, domain: &str) -> Result<()> {
        fs::write(&self.test_hosts, dnscheck::test_hosts_line(domain))
            .with_context(|| format!("Failed to write {}", self.test_hosts.display()))?;
        let fragment = dnscheck::test_fragment(cluster, domain, &self.test_hosts.to_string_lossy());
        fs::write(&self.test_fragment, fragment)
            .with_context(|| format!("Failed to write {}", self.test_fragment.display()))?;
        info!(
            hosts = %self.test_hosts.display(),
            fragment = %self.test_fragment.display(),
            "DNS test records written"
        );
        Ok(())
    }

    fn remove_test_records(&self) -> Result<()> {
        remove_if_present(&self.test_hosts)?;
        remove_if_present(&self.test_fragment)
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

impl HostsStore for FileHostsStore {
    fn prepare(&self) -> Result<()> {
        if !self.hosts_path.exists() {
            fs::write(&self.hosts_path, "")
                .with_context(|| format!("Failed to create {}", self.hosts_path.display()))?;
        }
        let fragment = hosts::resolver_fragment(&self.hosts_path.to_string_lossy());
        fs::write(&self.fragment_path, fragment)
            .with_context(|| format!("Failed to write {}", self.fragment_path.display()))?;
        info!(
            hosts = %self.hosts_path.display(),
            fragment = %self.fragment_path.display(),
            "name resolution prepared"
        );
        Ok(())
    }

    fn publish(&self, entry: &HostEntry, mode: PublishMode) -> Result<()> {
        match mode {
            PublishMode::Append => self.append_line(&entry.to_line())?,
            PublishMode::Upsert => self.rewrite_with(entry)?,
        }
        info!(line = %entry.to_line(), ?mode, "host record published");
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        remove_if_present(&self.hosts_path)?;
        remove_if_present(&self.fragment_path)
    }
}
