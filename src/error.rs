//! Domain errors for environment lifecycle operations

/// Errors surfaced by lifecycle operations.
///
/// Validation and existence errors are raised before any side effect is
/// performed. `RegistrationFailed` is never fatal to environment creation;
/// callers surface it as a warning instead.
#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    /// Bad or empty site name, rejected before any side effect
    #[error("invalid site name {name:?}: {reason}")]
    Validation { name: String, reason: String },

    /// An environment directory with this name already exists
    #[error("environment '{0}' already exists")]
    AlreadyExists(String),

    /// No environment directory with this name
    #[error("environment '{0}' not found")]
    NotFound(String),

    /// Certificate or credential material could not be generated
    #[error("provisioning for '{host}' failed: {reason}")]
    ProvisioningFailed { host: String, reason: String },

    /// The container runtime returned a non-zero exit
    #[error("{operation} failed for '{target}' (exit code {code})")]
    FleetOperationFailed {
        operation: String,
        target: String,
        code: i64,
    },

    /// The container runtime itself is unreachable
    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Host-name registration could not be applied
    #[error("host-name registration failed: {0}")]
    RegistrationFailed(String),

    /// A database dump was attempted and failed
    #[error("backup of '{name}' failed during {step}: {reason}")]
    BackupFailed {
        name: String,
        step: String,
        reason: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SiteError>;

impl SiteError {
    /// Map the error to a process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            SiteError::Validation { .. } => 2,
            _ => 1,
        }
    }
}
