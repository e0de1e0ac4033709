use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_runtime_control_plane::{
    ControlPlaneError, CreatedRuntime, ResourceControlApi, RuntimeRecord, RuntimeSpec,
};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelSignal;
use crate::error::ProvisionError;
use crate::sidecar;

/// The control plane exposes no deletion-complete signal, so the name is
/// assumed released after this long.
pub const DEFAULT_DELETION_WAIT: Duration = Duration::from_secs(150);

#[derive(Clone, Debug)]
pub struct ProvisionerConfig {
    pub deletion_wait: Duration,
    /// Directory that receives the `.agent_arn` sidecar.
    pub output_dir: PathBuf,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            deletion_wait: DEFAULT_DELETION_WAIT,
            output_dir: PathBuf::from("."),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionResult {
    pub runtime_id: String,
    pub handle: String,
    pub status: String,
    pub recreated: bool,
    /// `None` when the sidecar could not be written.
    pub sidecar_path: Option<PathBuf>,
}

/// A name conflict without force-recreate. Nothing was mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct ConflictAbort {
    pub name: String,
    pub existing: Vec<RuntimeRecord>,
}

impl ConflictAbort {
    pub fn guidance(&self) -> String {
        format!(
            "agent runtime '{}' already exists; retry with a new name via --runtime-name, \
             or pass --force-recreate to delete and recreate it",
            self.name
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProvisionOutcome {
    Provisioned(ProvisionResult),
    Aborted(ConflictAbort),
}

pub struct Provisioner {
    api: Arc<dyn ResourceControlApi>,
    config: ProvisionerConfig,
    cancel: CancelSignal,
}

impl Provisioner {
    pub fn new(api: Arc<dyn ResourceControlApi>, config: ProvisionerConfig) -> Self {
        Self {
            api,
            config,
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Creates `spec`, resolving a name conflict by delete-wait-recreate when
    /// `force_recreate` is set. At most two create calls are ever issued, and
    /// no create follows a failed delete.
    pub async fn provision(
        &self,
        spec: &RuntimeSpec,
        force_recreate: bool,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let name = spec.name();
        self.ensure_not_cancelled(name)?;
        info!(runtime = name, force_recreate, "creating agent runtime");

        let conflict = match self.api.create_runtime(spec).await {
            Ok(created) => {
                info!(runtime = name, "agent runtime created");
                return Ok(ProvisionOutcome::Provisioned(self.finish(created, false)));
            }
            Err(err) if err.is_name_conflict() => err,
            Err(err) => {
                error!(
                    runtime = name,
                    code = err.code(),
                    error = %err,
                    "failed to create agent runtime"
                );
                return Err(err.into());
            }
        };

        warn!(runtime = name, detail = %conflict, "agent runtime already exists");
        let existing = self.report_existing_runtimes().await;

        if !force_recreate {
            let abort = ConflictAbort {
                name: name.to_string(),
                existing,
            };
            info!("{}", abort.guidance());
            return Ok(ProvisionOutcome::Aborted(abort));
        }

        info!(
            runtime = name,
            "force recreate requested, deleting existing runtime"
        );
        self.ensure_not_cancelled(name)?;
        let runtime_id = self.find_runtime_id(name).await?;
        // The lookup is a network round trip; re-check right before the delete.
        self.ensure_not_cancelled(name)?;
        self.delete(&runtime_id).await?;
        self.wait_for_deletion(name).await?;
        self.ensure_not_cancelled(name)?;

        info!(runtime = name, "attempting to recreate agent runtime");
        match self.api.create_runtime(spec).await {
            Ok(created) => {
                info!(runtime = name, "agent runtime recreated");
                Ok(ProvisionOutcome::Provisioned(self.finish(created, true)))
            }
            Err(err) if err.is_name_conflict() => {
                let waited_secs = self.config.deletion_wait.as_secs();
                error!(
                    runtime = name,
                    waited_secs,
                    "agent runtime name is still unavailable; control plane cleanup is still in progress"
                );
                Err(ProvisionError::DeletionNotPropagated {
                    name: name.to_string(),
                    waited_secs,
                })
            }
            Err(err) => {
                error!(
                    runtime = name,
                    code = err.code(),
                    error = %err,
                    "failed to recreate agent runtime"
                );
                Err(err.into())
            }
        }
    }

    fn ensure_not_cancelled(&self, name: &str) -> Result<(), ProvisionError> {
        if self.cancel.is_cancelled() {
            warn!(runtime = name, "provisioning cancelled before next step");
            return Err(ProvisionError::Cancelled {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Diagnostic only: a failed listing is logged and never changes the outcome.
    async fn report_existing_runtimes(&self) -> Vec<RuntimeRecord> {
        let runtimes = match self.api.list_runtimes().await {
            Ok(runtimes) => runtimes,
            Err(err) => {
                error!(error = %err, "failed to list agent runtimes");
                return Vec::new();
            }
        };
        if runtimes.is_empty() {
            info!("no existing agent runtimes found");
            return runtimes;
        }
        info!(count = runtimes.len(), "existing agent runtimes");
        for runtime in &runtimes {
            let rendered = serde_json::to_string_pretty(runtime)
                .unwrap_or_else(|_| format!("{runtime:?}"));
            info!("{rendered}");
        }
        runtimes
    }

    async fn find_runtime_id(&self, name: &str) -> Result<String, ProvisionError> {
        let runtimes = self.api.list_runtimes().await.map_err(|err| {
            error!(error = %err, "failed to list agent runtimes for lookup");
            ProvisionError::from(err)
        })?;
        match find_by_name(&runtimes, name) {
            Some(runtime) => {
                debug!(runtime = name, runtime_id = %runtime.id, "resolved runtime id");
                Ok(runtime.id.clone())
            }
            None => {
                error!(runtime = name, "could not find runtime id");
                Err(ProvisionError::ResourceNotFound {
                    name: name.to_string(),
                })
            }
        }
    }

    async fn delete(&self, runtime_id: &str) -> Result<(), ProvisionError> {
        info!(runtime_id, "deleting agent runtime");
        self.api
            .delete_runtime(runtime_id)
            .await
            .map_err(|source: ControlPlaneError| {
                error!(
                    runtime_id,
                    code = source.code(),
                    error = %source,
                    "failed to delete existing runtime"
                );
                ProvisionError::DeletionFailed {
                    id: runtime_id.to_string(),
                    source,
                }
            })?;
        info!(runtime_id, "agent runtime deleted");
        Ok(())
    }

    async fn wait_for_deletion(&self, name: &str) -> Result<(), ProvisionError> {
        let wait = self.config.deletion_wait;
        info!(
            wait_secs = wait.as_secs(),
            "waiting for deletion to complete"
        );
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = cancel.cancelled() => {
                warn!(runtime = name, "deletion wait cancelled");
                Err(ProvisionError::Cancelled {
                    name: name.to_string(),
                })
            }
        }
    }

    fn finish(&self, created: CreatedRuntime, recreated: bool) -> ProvisionResult {
        info!(
            handle = %created.handle,
            status = %created.status,
            "agent runtime ready"
        );
        let sidecar_path = match sidecar::write_handle(&self.config.output_dir, &created.handle) {
            Ok(path) => {
                info!(path = %path.display(), "agent runtime handle saved");
                Some(path)
            }
            Err(err) => {
                error!(
                    dir = %self.config.output_dir.display(),
                    error = %err,
                    "failed to write agent runtime handle"
                );
                None
            }
        };
        ProvisionResult {
            runtime_id: created.id,
            handle: created.handle,
            status: created.status,
            recreated,
            sidecar_path,
        }
    }
}

fn find_by_name<'a>(runtimes: &'a [RuntimeRecord], name: &str) -> Option<&'a RuntimeRecord> {
    runtimes.iter().find(|runtime| runtime.name == name)
}
