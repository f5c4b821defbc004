use serde::{Deserialize, Serialize};

use crate::error::MigrateError;

/// Highest Terraform version the destination accepts; source workspaces
/// above it are downgraded with a warning.
pub const MAX_TERRAFORM_VERSION: &str = "1.5.7";

pub const DEFAULT_MANAGEMENT_ENV_NAME: &str = "scalr-admin";

/// What to do with sensitive shell variables whose values the listing API
/// withholds. `Recover` routes `TF_VAR_`-prefixed keys through the plan
/// artifact lookup; `Skip` drops every sensitive shell variable with a
/// warning.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SensitiveEnvPolicy {
    #[default]
    Recover,
    Skip,
}

/// The whole configuration surface, built once by the CLI layer and passed
/// by reference into the orchestrator. The engine holds no other ambient
/// state.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct MigrationConfig {
    pub scalr_hostname: String,
    pub scalr_token: String,
    pub tfc_hostname: String,
    pub tfc_token: String,
    pub tfc_organization: String,
    pub tfc_project: Option<String>,

    /// Destination environment name; defaults to the source project name,
    /// then the source organization name.
    pub scalr_environment: Option<String>,

    pub vcs_name: Option<String>,
    pub pc_name: Option<String>,
    pub agent_pool_name: Option<String>,

    /// Comma-separated globs selecting which workspaces migrate.
    pub workspaces: String,
    /// Comma-separated globs of variable keys to leave behind, or `*` to
    /// skip variable migration entirely.
    pub skip_variables: Option<String>,

    pub skip_workspace_creation: bool,
    pub skip_backend_secrets: bool,
    /// Lock migrated source workspaces at the end of the run.
    pub lock: bool,
    pub management_env_name: String,
    pub disable_deletion_protection: bool,
    /// Push historical state versions (ascending serial) before the
    /// current one.
    pub migrate_state_history: bool,
    pub sensitive_env_policy: SensitiveEnvPolicy,
    /// Upper bound on concurrently migrating workspace units.
    pub max_concurrent: usize,
    /// Attempts per API call before a transient failure is promoted.
    pub max_retries: u32,
    /// Concurrent in-flight requests allowed per platform host.
    pub rate_limit: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            scalr_hostname: String::new(),
            scalr_token: String::new(),
            tfc_hostname: "app.terraform.io".to_string(),
            tfc_token: String::new(),
            tfc_organization: String::new(),
            tfc_project: None,
            scalr_environment: None,
            vcs_name: None,
            pc_name: None,
            agent_pool_name: None,
            workspaces: "*".to_string(),
            skip_variables: None,
            skip_workspace_creation: false,
            skip_backend_secrets: false,
            lock: true,
            management_env_name: DEFAULT_MANAGEMENT_ENV_NAME.to_string(),
            disable_deletion_protection: false,
            migrate_state_history: false,
            sensitive_env_policy: SensitiveEnvPolicy::default(),
            max_concurrent: 4,
            max_retries: 3,
            rate_limit: 8,
        }
    }
}

impl MigrationConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MigrationConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Destination environment name, falling back to the source project,
    /// then the source organization.
    pub fn environment_name(&self) -> &str {
        self.scalr_environment
            .as_deref()
            .or(self.tfc_project.as_deref())
            .unwrap_or(&self.tfc_organization)
    }

    /// The management workspace is named after the destination environment.
    pub fn management_workspace_name(&self) -> &str {
        self.environment_name()
    }

    pub fn output_dir(&self) -> String {
        format!("generated-terraform/{}", self.environment_name())
    }

    pub fn validate(&self) -> Result<(), MigrateError> {
        let mut missing = Vec::new();
        if self.scalr_hostname.is_empty() {
            missing.push("scalr_hostname");
        }
        if self.scalr_token.is_empty() {
            missing.push("scalr_token");
        }
        if self.tfc_hostname.is_empty() {
            missing.push("tfc_hostname");
        }
        if self.tfc_token.is_empty() {
            missing.push("tfc_token");
        }
        if self.tfc_organization.is_empty() {
            missing.push("tfc_organization");
        }
        if !missing.is_empty() {
            return Err(MigrateError::Config(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        if !self.skip_workspace_creation && self.vcs_name.is_none() {
            return Err(MigrateError::Config(
                "vcs_name is required unless skip_workspace_creation is set".to_string(),
            ));
        }

        if self.max_concurrent == 0 {
            return Err(MigrateError::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> MigrationConfig {
        MigrationConfig {
            scalr_hostname: "acme.scalr.io".into(),
            scalr_token: "scalr-token".into(),
            tfc_hostname: "app.terraform.io".into(),
            tfc_token: "tfc-token".into(),
            tfc_organization: "acme".into(),
            vcs_name: Some("github".into()),
            ..MigrationConfig::default()
        }
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = minimal();
        let yaml_str = serde_yaml::to_string(&config).unwrap();
        let parsed: MigrationConfig = serde_yaml::from_str(&yaml_str).unwrap();
        assert_eq!(parsed.tfc_organization, "acme");
        assert_eq!(parsed.workspaces, "*");
        assert!(parsed.lock);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml_str = r#"
scalr_hostname: acme.scalr.io
scalr_token: t1
tfc_token: t2
tfc_organization: acme
vcs_name: github
"#;
        let config: MigrationConfig = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(config.tfc_hostname, "app.terraform.io");
        assert_eq!(config.management_env_name, DEFAULT_MANAGEMENT_ENV_NAME);
        assert_eq!(config.max_concurrent, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_name_falls_back() {
        let mut config = minimal();
        assert_eq!(config.environment_name(), "acme");

        config.tfc_project = Some("payments".into());
        assert_eq!(config.environment_name(), "payments");

        config.scalr_environment = Some("prod".into());
        assert_eq!(config.environment_name(), "prod");
        assert_eq!(config.output_dir(), "generated-terraform/prod");
    }

    #[test]
    fn vcs_required_without_skip_creation() {
        let mut config = minimal();
        config.vcs_name = None;
        assert!(config.validate().is_err());

        config.skip_workspace_creation = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_tokens_fail_validation() {
        let mut config = minimal();
        config.scalr_token = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scalr_token"));
    }
}
