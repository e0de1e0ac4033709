use std::collections::BTreeMap;

use agent_runtime_control_plane::mask_secret;
use tracing::info;

pub const GATEWAY_ACCESS_TOKEN: &str = "GATEWAY_ACCESS_TOKEN";
pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const LLM_PROVIDER: &str = "LLM_PROVIDER";
pub const DEBUG: &str = "DEBUG";
pub const DEFAULT_LLM_PROVIDER: &str = "bedrock";

/// Secrets and switches resolved by the caller before provisioning.
#[derive(Clone, Default)]
pub struct RuntimeSecrets {
    pub gateway_access_token: String,
    pub anthropic_api_key: Option<String>,
    pub llm_provider: Option<String>,
    pub debug: bool,
}

/// Builds the environment handed to the runtime container.
///
/// The Anthropic key is only passed through when present; without it the
/// runtime falls back to the default provider.
pub fn runtime_environment(secrets: &RuntimeSecrets) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert(
        GATEWAY_ACCESS_TOKEN.to_string(),
        secrets.gateway_access_token.clone(),
    );
    let provider = secrets
        .llm_provider
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_LLM_PROVIDER);
    env.insert(LLM_PROVIDER.to_string(), provider.to_string());
    if let Some(key) = secrets
        .anthropic_api_key
        .as_deref()
        .filter(|key| !key.trim().is_empty())
    {
        env.insert(ANTHROPIC_API_KEY.to_string(), key.to_string());
    }
    if secrets.debug {
        env.insert(DEBUG.to_string(), "true".to_string());
    }
    env
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes"
    )
}

pub fn log_environment(env: &BTreeMap<String, String>) {
    info!(count = env.len(), "environment variables passed to agent runtime");
    for (key, value) in env {
        info!(key = %key, value = %mask_secret(value), "runtime env");
    }
}
