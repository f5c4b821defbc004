use anyhow::Result;
use clap::Parser;
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use scalr_migrate::config::{MigrationConfig, SensitiveEnvPolicy, DEFAULT_MANAGEMENT_ENV_NAME};
use scalr_migrate::orchestrator::Orchestrator;

/// Migrate workspaces from Terraform Cloud/Enterprise into Scalr.
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Load the migration configuration from a YAML file; flags override
    /// individual fields.
    #[clap(long)]
    config: Option<String>,

    #[clap(long, env = "SCALR_HOSTNAME")]
    scalr_hostname: Option<String>,
    #[clap(long, env = "SCALR_TOKEN", hide_env_values = true)]
    scalr_token: Option<String>,
    /// Scalr environment to create; defaults to the TFC/E project name,
    /// then the organization name.
    #[clap(long)]
    scalr_environment: Option<String>,
    #[clap(long, env = "TFC_HOSTNAME", default_value = "app.terraform.io")]
    tfc_hostname: String,
    #[clap(long, env = "TFC_TOKEN", hide_env_values = true)]
    tfc_token: Option<String>,
    #[clap(long)]
    tfc_organization: Option<String>,
    /// TFC project name to filter workspaces by.
    #[clap(long)]
    tfc_project: Option<String>,

    /// VCS provider name in Scalr.
    #[clap(short, long)]
    vcs_name: Option<String>,
    /// Provider configuration name in Scalr.
    #[clap(long)]
    pc_name: Option<String>,
    /// Agent pool name in Scalr.
    #[clap(long)]
    agent_pool_name: Option<String>,

    /// Workspaces to migrate (comma-separated globs). Default: all.
    #[clap(short, long)]
    workspaces: Option<String>,
    /// Comma-separated variable keys to skip, or "*" to skip all
    /// variables.
    #[clap(long)]
    skip_variables: Option<String>,

    /// Do not create workspaces; reuse ones already present in Scalr.
    #[clap(long)]
    skip_workspace_creation: bool,
    /// Do not create the SCALR_*/TFE_* backend secrets.
    #[clap(long)]
    skip_backend_secrets: bool,
    /// Do not lock source workspaces after migration.
    #[clap(long)]
    skip_tfc_lock: bool,
    #[clap(long, default_value = DEFAULT_MANAGEMENT_ENV_NAME)]
    management_env_name: String,
    /// Disable deletion protection on created workspace resources.
    #[clap(long)]
    disable_deletion_protection: bool,
    /// Push historical state versions before the current one.
    #[clap(long)]
    migrate_state_history: bool,
    /// Policy for sensitive shell variables: recover or skip.
    #[clap(long, value_enum, default_value = "recover")]
    sensitive_env_policy: CliSensitiveEnvPolicy,
    /// Concurrently migrating workspace units.
    #[clap(long, default_value = "4")]
    max_concurrent: usize,

    #[clap(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum CliSensitiveEnvPolicy {
    Recover,
    Skip,
}

impl From<CliSensitiveEnvPolicy> for SensitiveEnvPolicy {
    fn from(policy: CliSensitiveEnvPolicy) -> Self {
        match policy {
            CliSensitiveEnvPolicy::Recover => SensitiveEnvPolicy::Recover,
            CliSensitiveEnvPolicy::Skip => SensitiveEnvPolicy::Skip,
        }
    }
}

impl Cli {
    fn into_config(self) -> Result<MigrationConfig> {
        let mut config = match &self.config {
            Some(path) => MigrationConfig::from_file(path)?,
            None => MigrationConfig::default(),
        };

        if let Some(value) = self.scalr_hostname {
            config.scalr_hostname = value;
        }
        if let Some(value) = self.scalr_token {
            config.scalr_token = value;
        }
        if let Some(value) = self.scalr_environment {
            config.scalr_environment = Some(value);
        }
        config.tfc_hostname = self.tfc_hostname;
        if let Some(value) = self.tfc_token {
            config.tfc_token = value;
        }
        if let Some(value) = self.tfc_organization {
            config.tfc_organization = value;
        }
        if let Some(value) = self.tfc_project {
            config.tfc_project = Some(value);
        }
        if let Some(value) = self.vcs_name {
            config.vcs_name = Some(value);
        }
        if let Some(value) = self.pc_name {
            config.pc_name = Some(value);
        }
        if let Some(value) = self.agent_pool_name {
            config.agent_pool_name = Some(value);
        }
        if let Some(value) = self.workspaces {
            config.workspaces = value;
        }
        if let Some(value) = self.skip_variables {
            config.skip_variables = Some(value);
        }
        config.skip_workspace_creation |= self.skip_workspace_creation;
        config.skip_backend_secrets |= self.skip_backend_secrets;
        if self.skip_tfc_lock {
            config.lock = false;
        }
        config.management_env_name = self.management_env_name;
        config.disable_deletion_protection |= self.disable_deletion_protection;
        config.migrate_state_history |= self.migrate_state_history;
        config.sensitive_env_policy = self.sensitive_env_policy.into();
        config.max_concurrent = self.max_concurrent;

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(&args.log_level);

    let config = args.into_config()?;
    let orchestrator = match Orchestrator::new(config) {
        Ok(orchestrator) => orchestrator,
        Err(err) => {
            error!("{}", err);
            std::process::exit(1);
        }
    };

    // Operator-initiated cancellation: stop launching units, let the
    // in-flight ones finish.
    let cancel = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested; waiting for in-flight workspaces to finish");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    match orchestrator.run().await {
        Ok(verdict) => {
            info!(
                "Run complete: {} migrated, {} failed, {} skipped, {} warning(s)",
                verdict.migrated, verdict.failed, verdict.skipped, verdict.warnings
            );
            Ok(())
        }
        Err(err) => {
            error!("Migration aborted: {}", err);
            std::process::exit(1);
        }
    }
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_ref()
        .unwrap_or(&"info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!("handlebars=off,{}", log_level)))
        .with_target(false)
        .init();
}
