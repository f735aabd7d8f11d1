//! Recording fakes for the capability traits.
//!
//! Each fake logs its calls as short strings ("create ocp4-master-2") and can
//! be told to fail on one exact call.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;

use ocpkvm_core::capability::{
    DnsLookup, DomainApi, HostsStore, ImageCustomizer, NetworkApi, ResolverFiles,
    ServiceController, SshProber, SshTarget,
};
use ocpkvm_core::dnscheck;
use ocpkvm_core::error::ProvisionError;
use ocpkvm_core::hosts::{self, HostEntry, PublishMode};
use ocpkvm_core::lease::InterfaceAddress;
use ocpkvm_core::node::Customization;
use ocpkvm_core::retry::Sleeper;

#[derive(Default)]
struct CallLog {
    calls: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl CallLog {
    fn record(&self, call: String) -> Result<()> {
        let fail = self.fail_on.lock().unwrap().as_deref() == Some(call.as_str());
        self.calls.lock().unwrap().push(call.clone());
        if fail {
            return Err(ProvisionError::hypervisor(call, "injected failure").into());
        }
        Ok(())
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn fail_on(&self, call: &str) {
        *self.fail_on.lock().unwrap() = Some(call.to_string());
    }
}

struct FakeNetwork {
    active: bool,
    xml: String,
}

/// In-memory hypervisor: networks, domains and DHCP leases.
///
/// Every created or started domain is handed a lease from 192.168.100.10
/// upwards, visible after its configured number of pending polls. A domain
/// booted from install XML reports running for its configured number of
/// state queries, then powers off.
#[derive(Default)]
pub struct FakeHypervisor {
    log: CallLog,
    networks: Mutex<HashMap<String, FakeNetwork>>,
    domains: Mutex<Vec<String>>,
    running: Mutex<HashSet<String>>,
    install_polls: Mutex<HashMap<String, u32>>,
    installing: Mutex<HashMap<String, u32>>,
    leases: Mutex<HashMap<String, (String, Ipv4Addr)>>,
    pending: Mutex<HashMap<String, u32>>,
    next_host: Mutex<u8>,
}

fn xml_name(xml: &str) -> String {
    xml.split_once("<name>")
        .and_then(|(_, rest)| rest.split_once("</name>"))
        .map(|(name, _)| name.to_string())
        .unwrap_or_default()
}

impl FakeHypervisor {
    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    pub fn fail_on(&self, call: &str) {
        self.log.fail_on(call);
    }

    pub fn add_network(&self, name: &str, active: bool, xml: &str) {
        self.networks.lock().unwrap().insert(
            name.to_string(),
            FakeNetwork {
                active,
                xml: xml.to_string(),
            },
        );
    }

    pub fn network_xml(&self, name: &str) -> Option<String> {
        self.networks.lock().unwrap().get(name).map(|n| n.xml.clone())
    }

    pub fn add_domain(&self, name: &str) {
        self.domains.lock().unwrap().push(name.to_string());
    }

    pub fn assign_lease(&self, vm: &str, mac: &str, ip: Ipv4Addr) {
        self.leases
            .lock()
            .unwrap()
            .insert(vm.to_string(), (mac.to_string(), ip));
    }

    pub fn set_pending_polls(&self, vm: &str, polls: u32) {
        self.pending.lock().unwrap().insert(vm.to_string(), polls);
    }

    pub fn set_install_polls(&self, vm: &str, polls: u32) {
        self.install_polls
            .lock()
            .unwrap()
            .insert(vm.to_string(), polls);
    }

    pub fn is_powered(&self, vm: &str) -> bool {
        self.running.lock().unwrap().contains(vm)
    }

    fn boot(&self, vm: &str) {
        self.running.lock().unwrap().insert(vm.to_string());
        let mut leases = self.leases.lock().unwrap();
        if leases.contains_key(vm) {
            return;
        }
        let mut next = self.next_host.lock().unwrap();
        let host = 10 + *next;
        *next += 1;
        leases.insert(
            vm.to_string(),
            (
                format!("52:54:00:00:00:{:02x}", host),
                Ipv4Addr::new(192, 168, 100, host),
            ),
        );
    }

    fn with_network<T>(&self, name: &str, f: impl FnOnce(&mut FakeNetwork) -> T) -> Result<T> {
        let mut nets = self.networks.lock().unwrap();
        match nets.get_mut(name) {
            Some(net) => Ok(f(net)),
            None => Err(ProvisionError::hypervisor("net-lookup", "Network not found").into()),
        }
    }
}

impl NetworkApi for FakeHypervisor {
    fn exists(&self, name: &str) -> Result<bool> {
        self.log.record(format!("net-exists {}", name))?;
        Ok(self.networks.lock().unwrap().contains_key(name))
    }

    fn is_active(&self, name: &str) -> Result<bool> {
        self.log.record(format!("net-active {}", name))?;
        self.with_network(name, |n| n.active)
    }

    fn define(&self, xml: &str) -> Result<()> {
        let name = xml_name(xml);
        self.log.record(format!("net-define {}", name))?;
        self.add_network(&name, false, xml);
        Ok(())
    }

    fn set_autostart(&self, name: &str) -> Result<()> {
        self.log.record(format!("net-autostart {}", name))
    }

    fn start(&self, name: &str) -> Result<()> {
        self.log.record(format!("net-start {}", name))?;
        self.with_network(name, |n| n.active = true)
    }

    fn bridge_name(&self, name: &str) -> Result<String> {
        self.log.record(format!("net-bridge {}", name))?;
        self.with_network(name, |_| name.to_string())
    }

    fn dump_xml(&self, name: &str) -> Result<String> {
        self.log.record(format!("net-dumpxml {}", name))?;
        self.with_network(name, |n| n.xml.clone())
    }

    fn add_dhcp_host(&self, name: &str, host_xml: &str) -> Result<()> {
        self.log.record(format!("net-update {} {}", name, host_xml))
    }
}

impl DomainApi for FakeHypervisor {
    fn define(&self, xml: &str) -> Result<()> {
        let name = xml_name(xml);
        self.log.record(format!("define {}", name))?;
        self.add_domain(&name);
        Ok(())
    }

    fn create_transient(&self, xml: &str) -> Result<()> {
        let name = xml_name(xml);
        self.log.record(format!("create {}", name))?;
        let polls = self
            .install_polls
            .lock()
            .unwrap()
            .get(&name)
            .copied()
            .unwrap_or(0);
        self.installing.lock().unwrap().insert(name.clone(), polls);
        self.boot(&name);
        Ok(())
    }

    fn start(&self, name: &str) -> Result<()> {
        self.log.record(format!("start {}", name))?;
        self.boot(name);
        Ok(())
    }

    fn destroy(&self, name: &str) -> Result<()> {
        self.log.record(format!("destroy {}", name))?;
        self.running.lock().unwrap().remove(name);
        Ok(())
    }

    fn is_running(&self, name: &str) -> Result<bool> {
        self.log.record(format!("domstate {}", name))?;
        let mut installing = self.installing.lock().unwrap();
        if let Some(left) = installing.get_mut(name) {
            if *left > 0 {
                *left -= 1;
                return Ok(true);
            }
            installing.remove(name);
            self.running.lock().unwrap().remove(name);
            return Ok(false);
        }
        Ok(self.running.lock().unwrap().contains(name))
    }

    fn allocate_disk(&self, path: &str, size_gib: u32) -> Result<()> {
        self.log.record(format!("allocate {} {}G", path, size_gib))
    }

    fn undefine(&self, name: &str) -> Result<()> {
        self.log.record(format!("undefine {}", name))?;
        self.domains.lock().unwrap().retain(|d| d != name);
        Ok(())
    }

    fn interface_addresses(&self, name: &str) -> Result<Vec<InterfaceAddress>> {
        self.log.record(format!("domifaddr {}", name))?;
        if let Some(left) = self.pending.lock().unwrap().get_mut(name)
            && *left > 0
        {
            *left -= 1;
            return Ok(Vec::new());
        }
        Ok(self
            .leases
            .lock()
            .unwrap()
            .get(name)
            .map(|(mac, ip)| {
                vec![InterfaceAddress {
                    interface: "vnet0".to_string(),
                    mac: mac.clone(),
                    protocol: "ipv4".to_string(),
                    address: format!("{}/24", ip),
                }]
            })
            .unwrap_or_default())
    }

    fn list(&self) -> Result<Vec<String>> {
        self.log.record("list".to_string())?;
        Ok(self.domains.lock().unwrap().clone())
    }
}

/// Every unit is active unless marked otherwise.
#[derive(Default)]
pub struct FakeServices {
    log: CallLog,
    inactive: Mutex<HashSet<String>>,
}

impl FakeServices {
    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    pub fn fail_on(&self, call: &str) {
        self.log.fail_on(call);
    }

    pub fn set_inactive(&self, service: &str) {
        self.inactive.lock().unwrap().insert(service.to_string());
    }
}

impl ServiceController for FakeServices {
    fn is_active(&self, service: &str) -> Result<bool> {
        self.log.record(format!("is-active {}", service))?;
        Ok(!self.inactive.lock().unwrap().contains(service))
    }

    fn restart(&self, service: &str) -> Result<()> {
        self.log.record(format!("restart {}", service))
    }

    fn reload(&self, service: &str) -> Result<()> {
        self.log.record(format!("reload {}", service))
    }
}

/// SSH prober that refuses the first `n` probes.
#[derive(Default)]
pub struct FakeSsh {
    log: CallLog,
    refusals: Mutex<u32>,
}

impl FakeSsh {
    pub fn reachable_after(refusals: u32) -> Self {
        Self {
            log: CallLog::default(),
            refusals: Mutex::new(refusals),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }
}

impl SshProber for FakeSsh {
    fn forget_host_key(&self, host: &str) -> Result<()> {
        self.log.record(format!("forget {}", host))
    }

    fn probe(&self, target: &SshTarget) -> Result<bool> {
        self.log
            .record(format!("probe {}@{}", target.user, target.ip))?;
        let mut left = self.refusals.lock().unwrap();
        if *left > 0 {
            *left -= 1;
            return Ok(false);
        }
        Ok(true)
    }
}

#[derive(Default)]
pub struct FakeCustomizer {
    log: CallLog,
}

impl FakeCustomizer {
    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    pub fn fail_on(&self, call: &str) {
        self.log.fail_on(call);
    }
}

impl ImageCustomizer for FakeCustomizer {
    fn customize(&self, image: &str, _customization: &Customization) -> Result<()> {
        self.log.record(format!("customize {}", image))
    }
}

/// Hosts store kept in memory, using the real merge rules.
#[derive(Default)]
pub struct FakeHosts {
    log: CallLog,
    content: Mutex<String>,
}

impl FakeHosts {
    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    pub fn lines(&self) -> Vec<String> {
        self.content
            .lock()
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl HostsStore for FakeHosts {
    fn prepare(&self) -> Result<()> {
        self.log.record("prepare".to_string())
    }

    fn publish(&self, entry: &HostEntry, mode: PublishMode) -> Result<()> {
        self.log.record(format!("publish {}", entry.to_line()))?;
        let mut content = self.content.lock().unwrap();
        *content = hosts::apply(&content, entry, mode);
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        self.log.record("remove".to_string())?;
        self.content.lock().unwrap().clear();
        Ok(())
    }
}

/// Resolver with canned answers. Unknown queries get an empty answer.
#[derive(Default)]
pub struct FakeDns {
    log: CallLog,
    answers: Mutex<HashMap<String, Vec<String>>>,
    pinned: Mutex<HashMap<(String, String), Vec<String>>>,
}

fn server_label(server: Option<Ipv4Addr>) -> String {
    server.map_or_else(|| "default".to_string(), |ip| ip.to_string())
}

impl FakeDns {
    /// Answers the self-test queries on every server.
    pub fn with_test_records(cluster: &str, domain: &str) -> Self {
        let dns = Self::default();
        for case in dnscheck::lookup_cases(cluster, domain) {
            dns.answer(&case.query, &[&case.expected]);
        }
        dns
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    pub fn answer(&self, query: &str, answer: &[&str]) {
        self.answers.lock().unwrap().insert(
            query.to_string(),
            answer.iter().map(|a| a.to_string()).collect(),
        );
    }

    /// Answer `query` differently when asked through `server`.
    pub fn answer_via(&self, query: &str, server: Option<Ipv4Addr>, answer: &[&str]) {
        self.pinned.lock().unwrap().insert(
            (query.to_string(), server_label(server)),
            answer.iter().map(|a| a.to_string()).collect(),
        );
    }

    fn resolve(&self, query: &str, server: Option<Ipv4Addr>) -> Vec<String> {
        let key = (query.to_string(), server_label(server));
        if let Some(answer) = self.pinned.lock().unwrap().get(&key) {
            return answer.clone();
        }
        self.answers
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default()
    }
}

impl DnsLookup for FakeDns {
    fn forward(&self, name: &str, server: Option<Ipv4Addr>) -> Result<Vec<String>> {
        self.log
            .record(format!("dig {} @{}", name, server_label(server)))?;
        Ok(self.resolve(name, server))
    }

    fn reverse(&self, ip: Ipv4Addr, server: Option<Ipv4Addr>) -> Result<Vec<String>> {
        self.log
            .record(format!("dig -x {} @{}", ip, server_label(server)))?;
        Ok(self.resolve(&ip.to_string(), server))
    }
}

/// In-memory resolv.conf and system hosts file.
pub struct FakeResolverFiles {
    log: CallLog,
    resolv_conf: Mutex<String>,
    system_hosts: Mutex<String>,
    installed: Mutex<bool>,
}

impl Default for FakeResolverFiles {
    fn default() -> Self {
        Self {
            log: CallLog::default(),
            resolv_conf: Mutex::new("nameserver 127.0.0.1\n".to_string()),
            system_hosts: Mutex::new("127.0.0.1 localhost\n".to_string()),
            installed: Mutex::new(false),
        }
    }
}

impl FakeResolverFiles {
    pub fn calls(&self) -> Vec<String> {
        self.log.calls()
    }

    pub fn fail_on(&self, call: &str) {
        self.log.fail_on(call);
    }

    pub fn set_resolv_conf(&self, content: &str) {
        *self.resolv_conf.lock().unwrap() = content.to_string();
    }

    pub fn set_system_hosts(&self, content: &str) {
        *self.system_hosts.lock().unwrap() = content.to_string();
    }

    pub fn test_records_present(&self) -> bool {
        *self.installed.lock().unwrap()
    }
}

impl ResolverFiles for FakeResolverFiles {
    fn resolv_conf(&self) -> Result<String> {
        Ok(self.resolv_conf.lock().unwrap().clone())
    }

    fn system_hosts(&self) -> Result<String> {
        Ok(self.system_hosts.lock().unwrap().clone())
    }

    fn install_test_records(&self, cluster: &str, domain: &str) -> Result<()> {
        self.log
            .record(format!("install-test-records {}.{}", cluster, domain))?;
        *self.installed.lock().unwrap() = true;
        Ok(())
    }

    fn remove_test_records(&self) -> Result<()> {
        self.log.record("remove-test-records".to_string())?;
        *self.installed.lock().unwrap() = false;
        Ok(())
    }
}

/// Records requested sleeps instead of blocking.
#[derive(Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn total(&self) -> Duration {
        self.slept.lock().unwrap().iter().sum()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}
