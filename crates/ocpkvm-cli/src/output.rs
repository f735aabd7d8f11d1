use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use ocpkvm_provision::orchestrator::{ClusterState, ProvisionedNode};

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable table (default).
    #[default]
    Table,
    /// JSON output.
    Json,
}

impl OutputFormat {
    /// Parse from CLI string argument.
    pub fn from_str_arg(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Table,
        }
    }
}

/// A provisioning run as reported to the user.
#[derive(Debug, Serialize)]
pub struct ProvisionSummary<'a> {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub state: &'a ClusterState,
}

impl ProvisionSummary<'_> {
    pub fn elapsed_secs(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds()
    }
}

/// Print any serializable value as pretty JSON.
pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", json);
    Ok(())
}

/// One row per node: name, role, fqdn, ip, mac.
pub fn node_rows(nodes: &[ProvisionedNode]) -> Vec<[String; 5]> {
    nodes
        .iter()
        .map(|n| {
            [
                n.spec.name.clone(),
                n.spec.role.to_string(),
                n.fqdn.clone(),
                n.lease.ip.to_string(),
                n.lease.mac.clone(),
            ]
        })
        .collect()
}

/// Render rows under a header with columns padded to their widest cell.
pub fn render_table(header: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.len());
            }
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = Vec::with_capacity(rows.len() + 1);
    out.push(line(header.to_vec()));
    for row in rows {
        out.push(line(row.iter().map(String::as_str).collect()));
    }
    out.join("\n")
}

/// Render the provisioning summary in the requested format.
pub fn render_summary(summary: &ProvisionSummary<'_>, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => render_json(summary),
        OutputFormat::Table => {
            let rows: Vec<Vec<String>> = node_rows(&summary.state.nodes)
                .into_iter()
                .map(Vec::from)
                .collect();
            println!(
                "{}",
                render_table(&["NAME", "ROLE", "FQDN", "IP", "MAC"], &rows)
            );
            Ok(())
        }
    }
}
