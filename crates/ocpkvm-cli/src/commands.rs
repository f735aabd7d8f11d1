use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::{error, info};

use crate::logging::{self, LogFormat};
use crate::output::{self, OutputFormat, ProvisionSummary};
use crate::ui;

use ocpkvm_core::config::{ClusterConfig, NetworkSection};
use ocpkvm_core::error::ProvisionError;
use ocpkvm_core::retry::ThreadSleeper;
use ocpkvm_provision::dns::LookupOutcome;
use ocpkvm_provision::orchestrator::{ClusterOrchestrator, ProvisionEnv};
use ocpkvm_runtime::customize::VirtCustomize;
use ocpkvm_runtime::dig::Dig;
use ocpkvm_runtime::haproxy;
use ocpkvm_runtime::hosts::{FileHostsStore, HostResolverFiles};
use ocpkvm_runtime::preflight::{self, PreflightReport};
use ocpkvm_runtime::ssh::OpenSsh;
use ocpkvm_runtime::systemd::Systemctl;
use ocpkvm_runtime::virsh::Virsh;

/// Rendered next to the working directory; the LB customization copies it in.
const HAPROXY_CFG: &str = "haproxy.cfg";

#[derive(Parser)]
#[command(
    name = "ocpkvm",
    version,
    about = "OpenShift UPI clusters on KVM via libvirt"
)]
struct Cli {
    /// Output format: table, json
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: String,

    /// Log format: human, json
    #[arg(long, global = true, default_value = "human")]
    log_format: String,

    #[command(flatten)]
    cluster: ClusterArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of the config file (or the defaults).
#[derive(Args, Debug, Default)]
struct ClusterArgs {
    /// Cluster config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cluster name, used as the VM name prefix
    #[arg(long, short = 'c', global = true)]
    cluster_name: Option<String>,

    /// Base domain of the cluster
    #[arg(long, short = 'd', global = true)]
    cluster_domain: Option<String>,

    /// Number of control-plane nodes
    #[arg(long, short = 'm', global = true)]
    masters: Option<u32>,

    /// Number of worker nodes
    #[arg(long, short = 'w', global = true)]
    workers: Option<u32>,

    /// Use an existing, running libvirt network
    #[arg(long, short = 'n', global = true)]
    libvirt_network: Option<String>,

    /// Create (or reuse) network ocp-<N> on 192.168.<N>.0/24
    #[arg(long, short = 'N', global = true)]
    libvirt_oct: Option<String>,

    /// Directory holding VM disk images
    #[arg(long, global = true)]
    vm_dir: Option<String>,

    /// Resolver drop-in directory
    #[arg(long, short = 'z', global = true)]
    dns_dir: Option<String>,

    /// SSH private key; the public key is <key>.pub
    #[arg(long, global = true)]
    ssh_key: Option<String>,

    /// Libvirt connection URI
    #[arg(long, global = true)]
    libvirt_uri: Option<String>,

    /// Bootstrap vCPUs
    #[arg(long, global = true)]
    bts_cpu: Option<u32>,

    /// Bootstrap memory (MiB)
    #[arg(long, global = true)]
    bts_mem: Option<u32>,

    /// Master vCPUs
    #[arg(long, global = true)]
    mas_cpu: Option<u32>,

    /// Master memory (MiB)
    #[arg(long, global = true)]
    mas_mem: Option<u32>,

    /// Worker vCPUs
    #[arg(long, global = true)]
    wor_cpu: Option<u32>,

    /// Worker memory (MiB)
    #[arg(long, global = true)]
    wor_mem: Option<u32>,

    /// Load balancer vCPUs
    #[arg(long, global = true)]
    lb_cpu: Option<u32>,

    /// Load balancer memory (MiB)
    #[arg(long, global = true)]
    lb_mem: Option<u32>,

    /// Port of the web server on the load balancer
    #[arg(long, global = true)]
    ws_port: Option<u16>,

    /// Give up waiting for a DHCP lease after this many polls
    #[arg(long, global = true)]
    lease_attempts: Option<u32>,

    /// Give up waiting for SSH after this many polls
    #[arg(long, global = true)]
    ssh_attempts: Option<u32>,

    /// Replace existing host records for the same names instead of appending
    #[arg(long, global = true)]
    upsert_hosts: bool,

    /// Do not run the resolver self-test before provisioning
    #[arg(long, global = true)]
    skip_dns_check: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ensure the cluster network exists and is running
    Network,
    /// Cluster name resolution
    Dns {
        #[command(subcommand)]
        action: DnsCmd,
    },
    /// Load balancer VM
    Lb {
        #[command(subcommand)]
        action: LbCmd,
    },
    /// Bootstrap, master and worker VMs
    Nodes {
        #[command(subcommand)]
        action: NodesCmd,
    },
    /// Provision everything: network, DNS, load balancer, nodes
    Up {
        /// Skip host preflight checks
        #[arg(long)]
        skip_preflight: bool,
    },
    /// Start every cluster VM
    Start,
    /// Hard-stop every cluster VM
    Stop,
    /// Stop and undefine every cluster VM, remove its host records
    Destroy {
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
    /// Check host prerequisites
    Check {
        /// Also run the resolver self-test (creates the network if needed)
        #[arg(long)]
        dns: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum DnsCmd {
    /// Create the hosts file and resolver fragment
    Prepare,
    /// Verify forward, reverse and wildcard resolution through the network gateway
    Check,
}

#[derive(Subcommand)]
enum LbCmd {
    /// Render haproxy.cfg, customize the LB disk, create and address the LB
    Create,
}

#[derive(Subcommand)]
enum NodesCmd {
    /// Create and address bootstrap, masters and workers
    Create {
        /// Address of the load balancer
        #[arg(long)]
        lb_ip: Ipv4Addr,
    },
}

impl ClusterArgs {
    /// Overlay the flags that were given onto `config`.
    fn apply(&self, config: &mut ClusterConfig) {
        if let Some(ref v) = self.cluster_name {
            config.cluster_name = v.clone();
        }
        if let Some(ref v) = self.cluster_domain {
            config.base_domain = v.clone();
        }
        if let Some(v) = self.masters {
            config.masters = v;
        }
        if let Some(v) = self.workers {
            config.workers = v;
        }
        // Either flag replaces the network section; both is rejected by validate.
        if self.libvirt_network.is_some() || self.libvirt_oct.is_some() {
            config.network = NetworkSection {
                octet: self.libvirt_oct.clone(),
                name: self.libvirt_network.clone(),
            };
        }
        if let Some(ref v) = self.vm_dir {
            config.vm_dir = v.clone();
        }
        if let Some(ref v) = self.dns_dir {
            config.dns.dns_dir = v.clone();
        }
        if let Some(ref v) = self.ssh_key {
            config.ssh.private_key = v.clone();
        }
        if let Some(ref v) = self.libvirt_uri {
            config.libvirt_uri = v.clone();
        }

        let roles = [
            (&mut config.bootstrap.cpus, self.bts_cpu),
            (&mut config.bootstrap.memory_mib, self.bts_mem),
            (&mut config.master.cpus, self.mas_cpu),
            (&mut config.master.memory_mib, self.mas_mem),
            (&mut config.worker.cpus, self.wor_cpu),
            (&mut config.worker.memory_mib, self.wor_mem),
            (&mut config.load_balancer.cpus, self.lb_cpu),
            (&mut config.load_balancer.memory_mib, self.lb_mem),
        ];
        for (field, flag) in roles {
            if let Some(v) = flag {
                *field = v;
            }
        }

        if let Some(v) = self.ws_port {
            config.load_balancer.web_server_port = v;
        }
        if self.lease_attempts.is_some() {
            config.poll.lease_max_attempts = self.lease_attempts;
        }
        if self.ssh_attempts.is_some() {
            config.poll.ssh_max_attempts = self.ssh_attempts;
        }
        if self.upsert_hosts {
            config.dns.upsert = true;
        }
        if self.skip_dns_check {
            config.dns.check = false;
        }
    }

    /// Config file (or defaults) with flag overrides, validated, with
    /// relative locations anchored at the working directory.
    fn load(&self) -> Result<ClusterConfig> {
        let mut config = match self.config {
            Some(ref path) => ClusterConfig::from_file(path)?,
            None => ClusterConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        let cwd = std::env::current_dir().context("Failed to determine working directory")?;
        config.resolve_paths(&cwd);
        Ok(config)
    }
}

/// Production backends behind the capability traits.
struct Backends {
    virsh: Virsh,
    services: Systemctl,
    dig: Dig,
    resolver_files: HostResolverFiles,
    ssh: OpenSsh,
    customizer: VirtCustomize,
    hosts: FileHostsStore,
    sleeper: ThreadSleeper,
}

impl Backends {
    fn new(config: &ClusterConfig) -> Self {
        Self {
            virsh: Virsh::new(&config.libvirt_uri),
            services: Systemctl,
            dig: Dig,
            resolver_files: HostResolverFiles::from_config(config),
            ssh: OpenSsh,
            customizer: VirtCustomize,
            hosts: FileHostsStore::from_config(config),
            sleeper: ThreadSleeper,
        }
    }

    fn env(&self) -> ProvisionEnv<'_> {
        ProvisionEnv {
            networks: &self.virsh,
            domains: &self.virsh,
            services: &self.services,
            lookup: &self.dig,
            resolver_files: &self.resolver_files,
            ssh: &self.ssh,
            customizer: &self.customizer,
            hosts: &self.hosts,
            sleeper: &self.sleeper,
        }
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    logging::init(LogFormat::from_str_arg(&cli.log_format));
    let out_fmt = OutputFormat::from_str_arg(&cli.output);

    let result = dispatch(cli, out_fmt);
    if let Err(ref e) = result {
        error!(error = %format!("{:#}", e), "command failed");
    }
    result
}

fn dispatch(cli: Cli, out_fmt: OutputFormat) -> Result<()> {
    // Completions need no cluster config.
    if let Commands::Completions { shell } = cli.command {
        return cmd_completions(shell);
    }

    let config = cli.cluster.load()?;
    let backends = Backends::new(&config);
    let orch = ClusterOrchestrator::new(&config, backends.env());

    match cli.command {
        Commands::Network => cmd_network(&orch, out_fmt),
        Commands::Dns {
            action: DnsCmd::Prepare,
        } => cmd_dns_prepare(&orch, &config),
        Commands::Dns {
            action: DnsCmd::Check,
        } => cmd_dns_check(&orch, out_fmt),
        Commands::Lb {
            action: LbCmd::Create,
        } => cmd_lb_create(&orch, &config, out_fmt),
        Commands::Nodes {
            action: NodesCmd::Create { lb_ip },
        } => cmd_nodes_create(&orch, lb_ip, out_fmt),
        Commands::Up { skip_preflight } => {
            cmd_up(&orch, &config, &backends, skip_preflight, out_fmt)
        }
        Commands::Start => cmd_start(&orch),
        Commands::Stop => cmd_stop(&orch),
        Commands::Destroy { yes } => cmd_destroy(&orch, &config, yes),
        Commands::Check { dns } => cmd_check(&orch, &config, &backends, dns, out_fmt),
        Commands::Completions { .. } => Ok(()),
    }
}

// ============================================================================
// Command handlers
// ============================================================================

fn cmd_network(orch: &ClusterOrchestrator<'_>, out_fmt: OutputFormat) -> Result<()> {
    let net = orch.ensure_network()?;
    match out_fmt {
        OutputFormat::Json => output::render_json(&net),
        OutputFormat::Table => {
            ui::status_line("Network:", &net.name);
            ui::status_line("Bridge:", &net.bridge);
            let gateway = net
                .gateway
                .map(|g| g.to_string())
                .unwrap_or_else(|| "-".to_string());
            ui::status_line("Gateway:", &gateway);
            Ok(())
        }
    }
}

fn cmd_dns_prepare(orch: &ClusterOrchestrator<'_>, config: &ClusterConfig) -> Result<()> {
    orch.prepare_dns()?;
    ui::success(&format!(
        "Hosts file {} and resolver fragment {} ready.",
        config.hosts_path(),
        config.resolver_fragment_path()
    ));
    Ok(())
}

fn cmd_dns_check(orch: &ClusterOrchestrator<'_>, out_fmt: OutputFormat) -> Result<()> {
    let net = orch.ensure_network()?;
    let outcomes = orch.check_dns(&net)?;
    match out_fmt {
        OutputFormat::Json => output::render_json(&outcomes),
        OutputFormat::Table => {
            println!("{}", render_lookups(&outcomes));
            ui::success("Cluster names resolve on this host and through the network gateway.");
            Ok(())
        }
    }
}

fn render_lookups(outcomes: &[LookupOutcome]) -> String {
    let rows: Vec<Vec<String>> = outcomes
        .iter()
        .map(|o| {
            vec![
                o.kind.to_string(),
                o.query.clone(),
                o.server.clone(),
                o.answer.clone(),
            ]
        })
        .collect();
    output::render_table(&["LOOKUP", "QUERY", "SERVER", "ANSWER"], &rows)
}

fn cmd_lb_create(
    orch: &ClusterOrchestrator<'_>,
    config: &ClusterConfig,
    out_fmt: OutputFormat,
) -> Result<()> {
    haproxy::write_config(config, Path::new(HAPROXY_CFG))?;
    let net = orch.ensure_network()?;
    let lb = orch.provision_load_balancer(&net)?;
    match out_fmt {
        OutputFormat::Json => output::render_json(&lb),
        OutputFormat::Table => {
            ui::success(&format!("Load balancer {} is up at {}.", lb.fqdn, lb.lease.ip));
            Ok(())
        }
    }
}

fn cmd_nodes_create(
    orch: &ClusterOrchestrator<'_>,
    lb_ip: Ipv4Addr,
    out_fmt: OutputFormat,
) -> Result<()> {
    let net = orch.ensure_network()?;
    let nodes = orch.provision_cohort(&net, lb_ip)?;
    match out_fmt {
        OutputFormat::Json => output::render_json(&nodes),
        OutputFormat::Table => {
            let rows: Vec<Vec<String>> = output::node_rows(&nodes)
                .into_iter()
                .map(Vec::from)
                .collect();
            println!(
                "{}",
                output::render_table(&["NAME", "ROLE", "FQDN", "IP", "MAC"], &rows)
            );
            Ok(())
        }
    }
}

fn cmd_up(
    orch: &ClusterOrchestrator<'_>,
    config: &ClusterConfig,
    backends: &Backends,
    skip_preflight: bool,
    out_fmt: OutputFormat,
) -> Result<()> {
    let started_at = Utc::now();

    ui::step(1, 3, "Preflight checks");
    if skip_preflight {
        ui::warn("Skipping preflight checks.");
    } else {
        let report = preflight::run(config, &backends.virsh)?;
        ensure_preflight(&report)?;
        ui::success("Host is ready.");
    }

    ui::step(2, 3, "Rendering load balancer config");
    haproxy::write_config(config, Path::new(HAPROXY_CFG))?;
    info!(path = HAPROXY_CFG, "haproxy config written");

    ui::step(3, 3, "Provisioning cluster");
    let state = orch.provision_all()?;

    let summary = ProvisionSummary {
        started_at,
        finished_at: Utc::now(),
        state: &state,
    };
    if out_fmt == OutputFormat::Table {
        let elapsed = format!("Finished in {}s", summary.elapsed_secs());
        ui::banner(&[
            &format!("Cluster {}.{} provisioned", state.cluster_name, state.base_domain),
            &elapsed,
        ]);
    }
    output::render_summary(&summary, out_fmt)
}

fn cmd_start(orch: &ClusterOrchestrator<'_>) -> Result<()> {
    let started = orch.start_cluster()?;
    ui::success(&format!("Started {} VM(s).", started.len()));
    Ok(())
}

fn cmd_stop(orch: &ClusterOrchestrator<'_>) -> Result<()> {
    let stopped = orch.stop_cluster()?;
    ui::success(&format!("Stopped {} VM(s).", stopped.len()));
    Ok(())
}

fn cmd_destroy(orch: &ClusterOrchestrator<'_>, config: &ClusterConfig, yes: bool) -> Result<()> {
    if !yes
        && !ui::confirm(&format!(
            "This will stop and undefine every VM of cluster '{}'. Continue?",
            config.cluster_name
        ))
    {
        ui::info("Cancelled.");
        return Ok(());
    }

    ui::info(&format!("Destroying cluster {}...", config.cluster_name));
    let removed = orch.destroy_cluster()?;
    ui::success(&format!(
        "Destroyed {} VM(s). Disks and DHCP reservations were left in place.",
        removed.len()
    ));
    Ok(())
}

fn cmd_check(
    orch: &ClusterOrchestrator<'_>,
    config: &ClusterConfig,
    backends: &Backends,
    dns: bool,
    out_fmt: OutputFormat,
) -> Result<()> {
    let report = preflight::run(config, &backends.virsh)?;
    match out_fmt {
        OutputFormat::Json => output::render_json(&report)?,
        OutputFormat::Table => {
            ui::header("Preflight");
            for tool in preflight::REQUIRED_TOOLS {
                let value = if report.missing_tools.iter().any(|t| t == tool) {
                    "Missing"
                } else {
                    "OK"
                };
                ui::status_line(tool, value);
            }
            for file in &report.missing_files {
                ui::status_line(file, "Missing");
            }
            for dom in &report.leftover_domains {
                ui::status_line(dom, "Already defined");
            }
        }
    }
    ensure_preflight(&report)?;
    if dns {
        if out_fmt == OutputFormat::Table {
            ui::header("DNS");
        }
        cmd_dns_check(orch, out_fmt)?;
    }
    Ok(())
}

fn cmd_completions(shell: clap_complete::Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "ocpkvm", &mut std::io::stdout());
    Ok(())
}

fn ensure_preflight(report: &PreflightReport) -> Result<()> {
    if report.is_ok() {
        return Ok(());
    }
    for problem in report.problems() {
        ui::error(&problem);
    }
    Err(ProvisionError::config("preflight checks failed")).context("Host is not ready")
}
