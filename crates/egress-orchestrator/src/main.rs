//! regional-egress: provision and tear down regional egress points
//!
//! Prints the JSON result as soon as the call returns, then waits for any
//! background work unless `--detach` is given.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use egress_orchestrator::aws::{AwsContext, get_caller_identity};
use egress_orchestrator::config::{AwsConfig, OrchestratorConfig};
use egress_orchestrator::orchestrator::{DeletionRequest, EgressOutcome, EgressRequest};
use egress_orchestrator::{delete_regional_egress, upsert_regional_egress};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "regional-egress")]
#[command(about = "Idempotent regional network egress on AWS")]
#[command(version)]
struct Args {
    /// AWS profile to use (overrides default credential resolution)
    #[arg(long, global = true, env = "AWS_PROFILE")]
    aws_profile: Option<String>,

    /// Region used when a command does not name one
    #[arg(long, global = true, env = "AWS_REGION")]
    default_region: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct UpsertArgs {
    /// Egress name; tags every resource and keys idempotency
    #[arg(long)]
    name: String,

    /// Give the egress point a dedicated public address
    #[arg(long)]
    public: bool,

    #[arg(long)]
    region: Option<String>,

    /// OpenVPN client profile; with --public, launches a VPN instance
    /// instead of a NAT gateway
    #[arg(long)]
    profile_file: Option<std::path::PathBuf>,

    /// Return without waiting for background completion
    #[arg(long)]
    detach: bool,
}

#[derive(clap::Args, Debug)]
struct DeleteArgs {
    #[arg(long)]
    name: String,

    /// Instance to terminate
    #[arg(long)]
    instance_id: Option<String>,

    #[arg(long)]
    region: Option<String>,

    /// Security group to delete (defaults to the egress name)
    #[arg(long)]
    security_group_name: Option<String>,

    /// VPC holding the security group (defaults to the default VPC)
    #[arg(long)]
    network_id: Option<String>,

    /// Subnet to delete
    #[arg(long)]
    subnet_id: Option<String>,

    /// Return without waiting for the teardown workers
    #[arg(long)]
    detach: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or reconcile an egress point
    Upsert(UpsertArgs),

    /// Tear down an egress point
    Delete(DeleteArgs),

    /// Validate AWS credentials
    Whoami {
        #[arg(long)]
        region: Option<String>,
    },
}

impl From<&Args> for OrchestratorConfig {
    fn from(args: &Args) -> Self {
        Self {
            aws: AwsConfig {
                default_region: args.default_region.clone(),
                aws_profile: args.aws_profile.clone(),
            },
            ..Self::default()
        }
    }
}

impl From<DeleteArgs> for DeletionRequest {
    fn from(args: DeleteArgs) -> Self {
        Self {
            instance_id: args.instance_id,
            name: args.name,
            region: args.region,
            security_group_name: args.security_group_name,
            network_id: args.network_id,
            subnet_id: args.subnet_id,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if let Some(hint) = egress_orchestrator::aws::classify_anyhow_error(e).suggestion() {
        let _ = writeln!(stderr, "\n\x1b[2mHint:\x1b[0m {hint}");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into())
                .add_directive("aws_config=warn".parse()?)
                .add_directive("aws_smithy_runtime=warn".parse()?)
                .add_directive("aws_sdk_ec2=warn".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = OrchestratorConfig::from(&args);

    match args.command {
        Command::Upsert(upsert) => handle_upsert(&config, upsert).await,
        Command::Delete(delete) => handle_delete(&config, delete).await,
        Command::Whoami { region } => handle_whoami(&config, region).await,
    }
}

async fn handle_upsert(config: &OrchestratorConfig, args: UpsertArgs) -> Result<()> {
    let vpn_profile = match &args.profile_file {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read VPN profile {}", path.display()))?,
        ),
        None => None,
    };
    let request = EgressRequest {
        name: args.name,
        public: args.public,
        region: args.region,
        vpn_profile,
    };

    let upsert = upsert_regional_egress(config, &request).await;
    print_json(&upsert.outcome)?;

    if let Some(completion) = upsert.completion {
        if args.detach {
            warn!("Detached; pending floating IP association stops when this process exits");
            completion.detach();
        } else {
            info!("Waiting for the instance to come up");
            let report = completion.wait().await?;
            print_json(&report)?;
        }
    }

    if matches!(upsert.outcome, EgressOutcome::Success(_)) {
        Ok(())
    } else {
        anyhow::bail!("Upsert of {} did not complete", request.name)
    }
}

async fn handle_delete(config: &OrchestratorConfig, args: DeleteArgs) -> Result<()> {
    let detach = args.detach;
    let request = DeletionRequest::from(args);

    let teardown = delete_regional_egress(config, &request).await;
    print_json(&teardown.result)?;

    let Some(handle) = teardown.handle else {
        anyhow::bail!("Teardown of {} was not started", request.name);
    };
    if detach {
        handle.detach();
        return Ok(());
    }

    let report = handle.wait().await?;
    print_json(&report)?;
    if !report.is_clean() {
        anyhow::bail!("{} cleanup step(s) failed", report.failures().count());
    }
    Ok(())
}

async fn handle_whoami(config: &OrchestratorConfig, region: Option<String>) -> Result<()> {
    let region = config
        .resolve_region(region.as_deref())
        .context("No region given; pass --region or --default-region")?;
    let ctx = AwsContext::with_profile(&region, config.aws.aws_profile.as_deref()).await;
    let identity = get_caller_identity(&ctx).await?;
    print_json(&identity)
}
