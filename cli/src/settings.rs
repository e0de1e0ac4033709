use std::path::Path;

use agent_runtime_provisioner::{
    ANTHROPIC_API_KEY, DEBUG, DEFAULT_LLM_PROVIDER, GATEWAY_ACCESS_TOKEN, LLM_PROVIDER, RuntimeSecrets,
    is_truthy,
};
use anyhow::Context;
use tracing::info;

pub fn load_env_file(path: &Path) -> anyhow::Result<()> {
    if !path.is_file() {
        anyhow::bail!(
            "env file not found at {}; create it with {GATEWAY_ACCESS_TOKEN} and optionally {ANTHROPIC_API_KEY}",
            path.display()
        );
    }
    dotenv::from_path(path).with_context(|| format!("load env file {}", path.display()))?;
    info!(path = %path.display(), "loaded environment variables");
    Ok(())
}

pub fn resolve_secrets() -> anyhow::Result<RuntimeSecrets> {
    resolve_secrets_with(|key| std::env::var(key).ok())
}

fn resolve_secrets_with(
    lookup: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<RuntimeSecrets> {
    let gateway_access_token = required_non_empty(&lookup, GATEWAY_ACCESS_TOKEN)
        .with_context(|| format!("{GATEWAY_ACCESS_TOKEN} must be set in the env file"))?;
    let secrets = RuntimeSecrets {
        gateway_access_token,
        anthropic_api_key: optional_non_empty(&lookup, ANTHROPIC_API_KEY),
        llm_provider: optional_non_empty(&lookup, LLM_PROVIDER),
        debug: lookup(DEBUG).is_some_and(|value| is_truthy(&value)),
    };

    info!(
        llm_provider = secrets.llm_provider.as_deref().unwrap_or(DEFAULT_LLM_PROVIDER),
        "resolved runtime configuration"
    );
    if secrets.anthropic_api_key.is_some() {
        info!("{ANTHROPIC_API_KEY}: set");
    } else {
        info!("{ANTHROPIC_API_KEY}: not set, Amazon Bedrock will be used as the provider");
    }
    info!("{GATEWAY_ACCESS_TOKEN}: set");
    if secrets.debug {
        info!("debug mode enabled for agent runtime");
    }
    Ok(secrets)
}

fn required_non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<String> {
    let value = lookup(key).with_context(|| format!("{key} must be set"))?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        anyhow::bail!("{key} must be non-empty");
    }
    Ok(trimmed.to_string())
}

fn optional_non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
