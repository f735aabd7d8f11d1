use anyhow::{Context, Result};
use std::process::{Command, Output, Stdio};

use ocpkvm_core::error::ProvisionError;

/// Render a command and its arguments as one line, for logs and mocks.
pub fn command_line(cmd: &str, args: &[&str]) -> String {
    if args.is_empty() {
        cmd.to_string()
    } else {
        format!("{} {}", cmd, args.join(" "))
    }
}

/// Run a command on the host, capturing output.
pub fn run_host(cmd: &str, args: &[&str]) -> Result<Output> {
    #[cfg(test)]
    if let Some(output) = super::shell_mock::intercept(&command_line(cmd, args)) {
        return Ok(output);
    }

    Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .with_context(|| format!("Failed to run: {}", command_line(cmd, args)))
}

/// Run a command and return trimmed stdout. A non-zero exit becomes
/// [`ProvisionError::Tool`] carrying stdout and stderr combined.
pub fn run_host_checked(cmd: &str, args: &[&str]) -> Result<String> {
    let output = run_host(cmd, args)?;
    if !output.status.success() {
        return Err(ProvisionError::Tool {
            tool: cmd.to_string(),
            code: output.status.code().unwrap_or(-1),
            output: combined_output(&output),
        }
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Run a command and report only whether it exited zero.
pub fn run_host_status(cmd: &str, args: &[&str]) -> Result<bool> {
    Ok(run_host(cmd, args)?.status.success())
}

/// stdout followed by stderr, trimmed.
pub fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    text.trim().to_string()
}
