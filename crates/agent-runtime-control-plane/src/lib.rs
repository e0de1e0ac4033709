//! Shared model for agent runtimes managed by a resource control plane.
//!
//! The provisioner and every concrete control-plane client speak in terms of
//! these types. [`ResourceControlApi`] is the only seam between them.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const CONFLICT_ERROR_CODE: &str = "ConflictException";
pub const DEFAULT_RUNTIME_NAME: &str = "sre-agent";

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkMode {
    #[default]
    Public,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum SpecError {
    #[error("runtime {0} must be non-empty")]
    EmptyField(&'static str),
}

/// Everything needed to ask the control plane for a runtime.
///
/// Built once per invocation and never mutated afterwards; fields are only
/// reachable through accessors. The `Debug` output masks environment values
/// since they routinely carry secrets.
#[derive(Clone, Eq, PartialEq)]
pub struct RuntimeSpec {
    name: String,
    container_uri: String,
    role_arn: String,
    network_mode: NetworkMode,
    environment: BTreeMap<String, String>,
}

impl RuntimeSpec {
    pub fn new(
        name: impl Into<String>,
        container_uri: impl Into<String>,
        role_arn: impl Into<String>,
        environment: BTreeMap<String, String>,
    ) -> Result<Self, SpecError> {
        let name = non_empty(name.into(), "name")?;
        let container_uri = non_empty(container_uri.into(), "container uri")?;
        let role_arn = non_empty(role_arn.into(), "role arn")?;
        Ok(Self {
            name,
            container_uri,
            role_arn,
            network_mode: NetworkMode::Public,
            environment,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container_uri(&self) -> &str {
        &self.container_uri
    }

    pub fn role_arn(&self) -> &str {
        &self.role_arn
    }

    pub fn network_mode(&self) -> NetworkMode {
        self.network_mode
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }
}

impl fmt::Debug for RuntimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked: BTreeMap<&str, String> = self
            .environment
            .iter()
            .map(|(key, value)| (key.as_str(), mask_secret(value)))
            .collect();
        f.debug_struct("RuntimeSpec")
            .field("name", &self.name)
            .field("container_uri", &self.container_uri)
            .field("role_arn", &self.role_arn)
            .field("network_mode", &self.network_mode)
            .field("environment", &masked)
            .finish()
    }
}

fn non_empty(value: String, field: &'static str) -> Result<String, SpecError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SpecError::EmptyField(field));
    }
    Ok(trimmed.to_string())
}

/// Masks a secret for logs: a fixed prefix plus at most the last eight characters.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let tail = if chars.len() > 8 {
        chars[chars.len() - 8..].iter().collect::<String>()
    } else {
        "***".to_string()
    };
    format!("{}...{tail}", "*".repeat(20))
}

/// The control plane's view of an existing runtime.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RuntimeRecord {
    #[serde(rename = "agentRuntimeId")]
    pub id: String,
    #[serde(rename = "agentRuntimeName")]
    pub name: String,
    #[serde(rename = "agentRuntimeArn", default)]
    pub handle: String,
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CreatedRuntime {
    #[serde(rename = "agentRuntimeId", default)]
    pub id: String,
    #[serde(rename = "agentRuntimeArn")]
    pub handle: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ControlPlaneError {
    #[error("runtime name already in use: {message}")]
    NameConflict { message: String },

    #[error("{operation} failed ({code}): {message}")]
    Api {
        operation: String,
        status: Option<u16>,
        code: String,
        message: String,
    },

    #[error("{operation} transport error: {detail}")]
    Transport { operation: String, detail: String },
}

impl ControlPlaneError {
    pub fn is_name_conflict(&self) -> bool {
        matches!(self, ControlPlaneError::NameConflict { .. })
    }

    pub fn code(&self) -> &str {
        match self {
            ControlPlaneError::NameConflict { .. } => CONFLICT_ERROR_CODE,
            ControlPlaneError::Api { code, .. } => code,
            ControlPlaneError::Transport { .. } => "Transport",
        }
    }
}

#[async_trait]
pub trait ResourceControlApi: Send + Sync {
    async fn create_runtime(
        &self,
        spec: &RuntimeSpec,
    ) -> Result<CreatedRuntime, ControlPlaneError>;

    async fn list_runtimes(&self) -> Result<Vec<RuntimeRecord>, ControlPlaneError>;

    async fn delete_runtime(&self, runtime_id: &str) -> Result<(), ControlPlaneError>;
}
