//! Custodian
//!
//! Validate governance policies and run them against resource snapshots.
//!
//! `validate` checks every filter and action declaration against its
//! schema without touching any resource. `run` evaluates the policies
//! over a JSON snapshot; mutating calls are intercepted and reported as
//! dry runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use custodian_policy::{ActionRegistry, FilterRegistry, PolicyCollection, PolicyEngine, RunReport};
use custodian_telemetry::AuditTrail;
use serde::Serialize;
use tracing::{error, info};

mod client;
mod config;
mod source;

use client::OfflineClient;
use source::SnapshotSource;

#[derive(Parser, Debug)]
#[command(name = "custodian")]
#[command(about = "Cloud governance policy engine", long_about = None)]
struct Cli {
    /// Engine configuration file
    #[arg(short, long, global = true, env = "CUSTODIAN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check policy files without running them
    Validate {
        /// Policy files
        #[arg(required = true)]
        policies: Vec<PathBuf>,
    },

    /// Run policies against a resource snapshot
    Run {
        /// Policy file
        #[arg(short, long)]
        policy: PathBuf,

        /// JSON snapshot of resources
        #[arg(short, long)]
        resources: PathBuf,

        /// Project reported as the default scope
        #[arg(long, default_value = "offline")]
        project: String,

        /// Write the run summary here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct RunSummary {
    run_id: String,
    reports: Vec<RunReport>,
    failed: Vec<String>,
    audit_events: usize,
    audit_verified: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    custodian_telemetry::metrics::describe();

    match &cli.command {
        Command::Validate { policies } => validate(cli.config.as_deref(), policies),
        Command::Run {
            policy,
            resources,
            project,
            output,
        } => {
            run(
                cli.config.as_deref(),
                policy,
                resources,
                project,
                output.as_deref(),
            )
            .await
        }
    }
}

fn build_engine(config_path: Option<&Path>, client: Arc<OfflineClient>) -> Result<PolicyEngine> {
    let config = config::load(config_path)?;

    let mut filters = FilterRegistry::with_defaults()?;
    custodian_remote::register_filters(&mut filters)?;
    let actions = ActionRegistry::with_defaults()?;

    Ok(PolicyEngine::new(filters, actions, client, config))
}

fn validate(config_path: Option<&Path>, paths: &[PathBuf]) -> Result<()> {
    let engine = build_engine(config_path, Arc::new(OfflineClient::new("offline")))?;

    let mut invalid = 0;
    for path in paths {
        let result = PolicyCollection::from_file(path)
            .map_err(anyhow::Error::from)
            .and_then(|collection| {
                engine.load(&collection)?;
                Ok(collection.len())
            });
        match result {
            Ok(count) => info!(file = %path.display(), policies = count, "Valid"),
            Err(e) => {
                error!(file = %path.display(), error = %e, "Invalid");
                invalid += 1;
            }
        }
    }

    if invalid > 0 {
        anyhow::bail!("{} of {} policy files invalid", invalid, paths.len());
    }
    Ok(())
}

async fn run(
    config_path: Option<&Path>,
    policy_path: &Path,
    resources_path: &Path,
    project: &str,
    output: Option<&Path>,
) -> Result<()> {
    let client = Arc::new(OfflineClient::new(project));
    let engine = build_engine(config_path, Arc::clone(&client))?;

    let collection = PolicyCollection::from_file(policy_path)
        .with_context(|| format!("failed to read {}", policy_path.display()))?;
    let policies = engine.load(&collection)?;
    let source = SnapshotSource::from_file(resources_path)
        .with_context(|| format!("failed to read {}", resources_path.display()))?;

    let mut audit = AuditTrail::new();
    let mut reports = Vec::with_capacity(policies.len());
    let mut failed = Vec::new();
    for policy in &policies {
        match policy.run(&source, &mut audit).await {
            Ok(report) => {
                info!(
                    policy = %report.policy,
                    matched = report.matched.len(),
                    duration_ms = report.duration_ms,
                    "Policy complete"
                );
                reports.push(report);
            }
            Err(e) => {
                error!(policy = policy.name(), error = %e, "Policy failed");
                failed.push(policy.name().to_string());
            }
        }
    }

    info!(
        reads = client.reads(),
        intercepted = client.writes(),
        "Provider calls"
    );

    let summary = RunSummary {
        run_id: audit.run_id().to_string(),
        reports,
        failed,
        audit_events: audit.len(),
        audit_verified: audit.verify(),
    };
    let rendered = serde_json::to_string_pretty(&summary)?;
    match output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", rendered),
    }

    if !summary.failed.is_empty() {
        anyhow::bail!("{} policies failed", summary.failed.len());
    }
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("custodian=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("custodian=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
