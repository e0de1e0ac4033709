use agent_runtime_control_plane::ControlPlaneError;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    NameConflict,
    ResourceNotFound,
    DeletionFailed,
    DeletionNotPropagated,
    OtherApiError,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("could not find runtime id for '{name}' among existing agent runtimes")]
    ResourceNotFound { name: String },

    #[error("failed to delete existing agent runtime {id}")]
    DeletionFailed {
        id: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error(
        "agent runtime name '{name}' is still in use {waited_secs}s after deletion; \
         the control plane has not finished cleanup. Wait 1-2 minutes and retry, \
         or use a different name (e.g. '{name}_v2')"
    )]
    DeletionNotPropagated { name: String, waited_secs: u64 },

    #[error("provisioning of '{name}' cancelled while waiting for deletion")]
    Cancelled { name: String },

    #[error(transparent)]
    Api(#[from] ControlPlaneError),
}

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            ProvisionError::DeletionFailed { .. } => ErrorKind::DeletionFailed,
            ProvisionError::DeletionNotPropagated { .. } => ErrorKind::DeletionNotPropagated,
            ProvisionError::Cancelled { .. } => ErrorKind::Cancelled,
            ProvisionError::Api(err) if err.is_name_conflict() => ErrorKind::NameConflict,
            ProvisionError::Api(_) => ErrorKind::OtherApiError,
        }
    }
}
