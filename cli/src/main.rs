mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_runtime_client::RuntimeControlClient;
use agent_runtime_control_plane::{DEFAULT_RUNTIME_NAME, RuntimeSpec};
use agent_runtime_provisioner::{
    CancelHandle, ProvisionError, ProvisionOutcome, Provisioner, ProvisionerConfig, cancel_pair,
    log_environment, runtime_environment,
};
use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "agent-runtime-deploy")]
#[command(about = "Deploy an agent container image to a managed agent runtime")]
struct Cli {
    /// Name for the agent runtime
    #[arg(long, default_value = DEFAULT_RUNTIME_NAME)]
    runtime_name: String,

    /// Container URI (e.g. account-id.dkr.ecr.us-west-2.amazonaws.com/my-agent:latest)
    #[arg(long)]
    container_uri: String,

    /// IAM role ARN for the agent runtime
    #[arg(long)]
    role_arn: String,

    /// Control plane region
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// Delete an existing runtime with the same name and recreate it
    #[arg(long)]
    force_recreate: bool,

    /// Env file with GATEWAY_ACCESS_TOKEN and optionally ANTHROPIC_API_KEY, LLM_PROVIDER
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Directory that receives the .agent_arn file
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Seconds to wait after deleting a runtime before recreating it
    #[arg(long, default_value_t = 150)]
    deletion_wait_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    settings::load_env_file(&cli.env_file)?;
    let secrets = settings::resolve_secrets()?;
    let environment = runtime_environment(&secrets);
    log_environment(&environment);

    let spec = RuntimeSpec::new(
        cli.runtime_name.as_str(),
        cli.container_uri.as_str(),
        cli.role_arn.as_str(),
        environment,
    )
    .context("build runtime spec")?;

    let client = RuntimeControlClient::from_env(&cli.region)?;
    info!(
        endpoint = client.base_url(),
        region = %cli.region,
        "using agent runtime control plane"
    );

    let (cancel, signal) = cancel_pair();
    tokio::spawn(watch_interrupts(cancel));

    let provisioner = Provisioner::new(
        Arc::new(client),
        ProvisionerConfig {
            deletion_wait: Duration::from_secs(cli.deletion_wait_secs),
            output_dir: cli.output_dir.clone(),
        },
    )
    .with_cancel_signal(signal);

    match provisioner.provision(&spec, cli.force_recreate).await {
        Ok(ProvisionOutcome::Provisioned(result)) => {
            let outcome = if result.recreated {
                "recreated"
            } else {
                "created"
            };
            print_json(json!({
                "outcome": outcome,
                "agent_runtime_id": result.runtime_id,
                "agent_runtime_arn": result.handle,
                "status": result.status,
                "arn_file": result.sidecar_path.map(|p| p.display().to_string()),
            }));
            Ok(())
        }
        Ok(ProvisionOutcome::Aborted(abort)) => {
            print_json(json!({
                "outcome": "aborted",
                "agent_runtime_name": abort.name,
                "existing_runtimes": abort.existing.len(),
                "hint": abort.guidance(),
            }));
            Ok(())
        }
        Err(err) => {
            if let ProvisionError::DeletionNotPropagated { name, .. } = &err {
                eprintln!();
                eprintln!("Please wait 1-2 minutes for the control plane to finish deleting '{name}',");
                eprintln!("then run the deployment again, or deploy under a new name such as '{name}_v2'.");
            }
            Err(anyhow::Error::new(err).context("provision agent runtime"))
        }
    }
}

/// First interrupt stops provisioning at its next step boundary (a pending
/// deletion wait ends at once; an in-flight request is allowed to finish).
/// A second interrupt exits immediately.
async fn watch_interrupts(cancel: CancelHandle) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    warn!(
        "interrupt received; provisioning stops before its next step \
         (press Ctrl-C again to exit now)"
    );
    cancel.cancel();
    if tokio::signal::ctrl_c().await.is_ok() {
        error!("second interrupt received, exiting");
        std::process::exit(130);
    }
}

fn print_json(value: serde_json::Value) {
    match serde_json::to_string_pretty(&value) {
        Ok(rendered) => println!("{rendered}"),
        Err(err) => error!(error = %err, "failed to render result"),
    }
}
