//! IAM Sync Agent
//!
//! Reconciles IAM users, groups and policies of managed AWS accounts
//! against declarative state in a Git repository, assuming a per-account
//! trust role from the account registry.
//!
//! # Usage
//! ```bash
//! # Full pass over every account in the state repository
//! iam-sync-agent --repo my-org/iam-state sync
//!
//! # Single account
//! iam-sync-agent --repo my-org/iam-state account staging
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use iam_sync::aws::dynamo::DynamoRegistry;
use iam_sync::aws::iam::AwsIam;
use iam_sync::aws::ses::SesTransport;
use iam_sync::aws::sts::StsExchange;
use iam_sync::credentials::CredentialContext;
use iam_sync::iam::Capability;
use iam_sync::orchestrator::Orchestrator;
use iam_sync::source::GithubSource;
use iam_sync::SyncConfig;

#[derive(Parser)]
#[command(name = "iam-sync-agent")]
#[command(about = "Multi-account IAM reconciliation agent", long_about = None)]
#[command(version)]
struct Cli {
    /// State repository as "owner/name"
    #[arg(long, env = "STATE_REPO")]
    repo: String,

    /// GitHub access token for private state repositories
    #[arg(long, env = "GITHUB_ACCESS_TOKEN")]
    token: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile every account in the state repository
    Sync,

    /// Reconcile a single account
    Account {
        /// Account name, as registered and as named in the repository
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = SyncConfig::from_env().context("invalid configuration")?;
    info!(repo = %cli.repo, root_account = %config.root_account, "iam-sync-agent starting");

    let aws_config =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).load().await;
    let region = aws_config
        .region()
        .map(|r| r.to_string())
        .unwrap_or_else(|| "us-east-1".to_string());

    let base: Capability = Arc::new(AwsIam::new(
        aws_sdk_iam::Client::new(&aws_config),
        config.users_path.clone(),
    ));
    let exchange = Arc::new(StsExchange::new(
        aws_sdk_sts::Client::new(&aws_config),
        region,
        config.users_path.clone(),
    ));
    let mut context = CredentialContext::new(base, exchange, config.root_account.clone());

    let registry = Arc::new(DynamoRegistry::new(
        aws_sdk_dynamodb::Client::new(&aws_config),
        config.registry_table.clone(),
    ));
    let source = Arc::new(GithubSource::new(cli.repo, cli.token)?);
    let transport = Arc::new(SesTransport::new(
        aws_sdk_sesv2::Client::new(&aws_config),
        config.mail_sender.clone(),
    ));

    let orchestrator = Orchestrator::new(registry, source, transport, config);

    let report = match cli.command {
        Commands::Sync => orchestrator.run(&mut context).await,
        Commands::Account { name } => orchestrator.run_accounts(&[name], &mut context).await,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    let failed = report.failed_accounts();
    if failed > 0 || !report.errors.is_empty() {
        anyhow::bail!("{failed} account(s) failed");
    }
    Ok(())
}
