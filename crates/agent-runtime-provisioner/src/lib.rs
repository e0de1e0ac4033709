//! Idempotent provisioning of named agent runtimes.
//!
//! [`Provisioner::provision`] creates a runtime and, when the name is already
//! taken, either stops with guidance or (with force-recreate) deletes the
//! existing runtime, waits out the deletion window and creates it once more.

mod cancel;
mod environment;
mod error;
mod provisioner;
mod sidecar;

pub use cancel::{CancelHandle, CancelSignal, cancel_pair};
pub use environment::{
    ANTHROPIC_API_KEY, DEBUG, DEFAULT_LLM_PROVIDER, GATEWAY_ACCESS_TOKEN, LLM_PROVIDER,
    RuntimeSecrets, is_truthy, log_environment, runtime_environment,
};
pub use error::{ErrorKind, ProvisionError};
pub use provisioner::{
    ConflictAbort, DEFAULT_DELETION_WAIT, ProvisionOutcome, ProvisionResult, Provisioner,
    ProvisionerConfig,
};
pub use sidecar::{SIDECAR_FILE_NAME, sidecar_path, write_handle};
