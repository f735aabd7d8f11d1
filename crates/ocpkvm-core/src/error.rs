use thiserror::Error;

/// Failure classes surfaced by the provisioning pipeline.
///
/// Everything is carried through `anyhow::Error`; callers that need to
/// tell the classes apart use `downcast_ref::<ProvisionError>()`.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Bad or contradictory parameters, detected before any external call.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A libvirt management call failed (lookup, define, create, update).
    #[error("hypervisor {operation} failed: {detail}")]
    Hypervisor { operation: String, detail: String },

    /// An external tool exited non-zero. `output` is stdout+stderr.
    #[error("{tool} exited with status {code}: {output}")]
    Tool {
        tool: String,
        code: i32,
        output: String,
    },

    /// A resolver answered a self-test query wrongly or not at all.
    #[error("{kind} lookup of {query} via {server} returned {answer:?}, expected {expected}")]
    Resolution {
        kind: String,
        query: String,
        server: String,
        expected: String,
        answer: Vec<String>,
    },

    /// A bounded poll ran out of attempts.
    #[error("{label}: not ready after {attempts} attempts")]
    Exhausted { label: String, attempts: u32 },
}

impl ProvisionError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn hypervisor(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Hypervisor {
            operation: operation.into(),
            detail: detail.into(),
        }
    }
}
