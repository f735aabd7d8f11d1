use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;

use crate::network::DhcpScope;
use crate::node::NodeSpec;

static GATEWAY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<ip\s+address=['"]([0-9.]+)['"]"#).expect("valid gateway regex")
});

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
        .replace('"', "&quot;")
}

/// NAT network whose bridge carries the network's name.
pub fn network_xml(name: &str, scope: &DhcpScope) -> String {
    format!(
        r#"<network>
  <name>{name}</name>
  <bridge name="{name}"/>
  <forward/>
  <ip address="{gw}" netmask="{mask}">
    <dhcp>
      <range start="{start}" end="{end}"/>
    </dhcp>
  </ip>
</network>
"#,
        name = escape(name),
        gw = scope.gateway,
        mask = scope.netmask,
        start = scope.range_start,
        end = scope.range_end,
    )
}

/// Persistent definition: boots from the disk.
pub fn domain_xml(spec: &NodeSpec) -> String {
    render_domain(spec, "    <boot dev='hd'/>\n", "")
}

/// Transient install-time definition: direct kernel boot into the installer,
/// torn down on the installer's reboot. `None` for roles without an install boot.
pub fn install_domain_xml(spec: &NodeSpec) -> Option<String> {
    let install = spec.install.as_ref()?;
    let os = format!(
        "    <kernel>{}</kernel>\n    <initrd>{}</initrd>\n    <cmdline>{}</cmdline>\n",
        escape(&install.kernel()),
        escape(&install.initrd()),
        escape(&install.kernel_args),
    );
    Some(render_domain(
        spec,
        &os,
        "  <on_reboot>destroy</on_reboot>\n",
    ))
}

fn render_domain(spec: &NodeSpec, os_boot: &str, lifecycle: &str) -> String {
    format!(
        r#"<domain type='kvm'>
  <name>{name}</name>
  <memory unit='MiB'>{memory}</memory>
  <vcpu placement='static'>{cpus}</vcpu>
  <cpu mode='host-passthrough'>
    <model fallback='allow'/>
  </cpu>
  <os>
    <type arch='x86_64' machine='q35'>hvm</type>
{os_boot}  </os>
  <features>
    <acpi/>
    <apic/>
  </features>
{lifecycle}  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='qcow2'/>
      <source file='{disk}'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <interface type='network'>
      <mac address='{mac}'/>
      <source network='{network}'/>
      <model type='virtio'/>
    </interface>
    <graphics type='vnc' autoport='yes'/>
  </devices>
</domain>
"#,
        name = escape(&spec.name),
        memory = spec.memory_mib,
        cpus = spec.cpus,
        os_boot = os_boot,
        lifecycle = lifecycle,
        disk = escape(&spec.disk_path),
        mac = escape(&spec.mac),
        network = escape(&spec.network),
    )
}

/// DHCP reservation element for `net-update ... ip-dhcp-host`.
pub fn dhcp_host_xml(mac: &str, ip: Ipv4Addr) -> String {
    format!("<host mac='{}' ip='{}'/>", escape(mac), ip)
}

/// First `<ip address=..>` in a network descriptor.
pub fn parse_gateway(network_xml: &str) -> Option<Ipv4Addr> {
    GATEWAY_RE
        .captures(network_xml)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
