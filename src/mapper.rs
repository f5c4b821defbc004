use indexmap::IndexMap;
use semver::Version;

use crate::api::tfc::TfcWorkspace;
use crate::config::{MigrationConfig, MAX_TERRAFORM_VERSION};
use crate::hcl::{HclBlock, HclValue};
use crate::report::{RunReport, WarningKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Remote,
    Local,
    Agent,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Remote => "remote",
            ExecutionMode::Local => "local",
            ExecutionMode::Agent => "agent",
        }
    }
}

#[derive(Debug, Clone)]
pub struct VcsSpec {
    pub identifier: String,
    pub branch: Option<String>,
    pub dry_runs_enabled: bool,
    pub ingress_submodules: bool,
    pub trigger_prefixes: Vec<String>,
    /// Ordered path globs; entries may not contain newlines themselves,
    /// but the joined form is multiline and must survive code generation
    /// byte-for-byte.
    pub trigger_patterns: Vec<String>,
}

impl VcsSpec {
    pub fn trigger_patterns_joined(&self) -> Option<String> {
        if self.trigger_patterns.is_empty() {
            None
        } else {
            Some(self.trigger_patterns.join("\n"))
        }
    }
}

/// The destination workspace specification one source workspace maps to.
#[derive(Debug, Clone)]
pub struct WorkspaceSpec {
    pub name: String,
    pub execution_mode: ExecutionMode,
    pub auto_apply: bool,
    pub terraform_version: String,
    pub working_directory: Option<String>,
    pub deletion_protection: bool,
    pub global_remote_state: bool,
    pub vcs: Option<VcsSpec>,
    pub wants_agent_pool: bool,
}

impl WorkspaceSpec {
    /// The destination's legacy operations flag: anything but local runs
    /// remotely.
    pub fn operations(&self) -> bool {
        self.execution_mode != ExecutionMode::Local
    }
}

/// Cap a source Terraform version at the destination's ceiling. Versions
/// the destination cannot parse are capped too; either way the workspace
/// migrates and the downgrade lands in the report.
pub fn enforce_max_version(version: &str, subject: &str, report: &RunReport) -> String {
    let max = Version::parse(MAX_TERRAFORM_VERSION).expect("ceiling version is valid");
    match Version::parse(version) {
        Ok(parsed) if parsed > max => {
            report.warn(
                WarningKind::VersionDowngrade,
                Some(subject),
                format!(
                    "uses Terraform {}, downgrading to {}",
                    version, MAX_TERRAFORM_VERSION
                ),
            );
            MAX_TERRAFORM_VERSION.to_string()
        }
        Ok(_) => version.to_string(),
        Err(_) => {
            report.warn(
                WarningKind::VersionDowngrade,
                Some(subject),
                format!(
                    "has unparseable Terraform version '{}', pinning to {}",
                    version, MAX_TERRAFORM_VERSION
                ),
            );
            MAX_TERRAFORM_VERSION.to_string()
        }
    }
}

fn validate_trigger_pattern(pattern: &str) -> bool {
    if pattern.starts_with('#') {
        return true;
    }
    let trimmed = pattern.trim();
    !trimmed.is_empty() && !trimmed.contains('\n') && !trimmed.contains('\r')
}

/// Translate one source workspace into the destination's workspace
/// specification.
pub fn map_workspace(
    source: &TfcWorkspace,
    config: &MigrationConfig,
    report: &RunReport,
) -> WorkspaceSpec {
    let attrs = &source.attributes;
    let name = attrs.name.clone();

    let execution_mode = match attrs.execution_mode.as_deref() {
        Some("agent") => ExecutionMode::Agent,
        Some("local") => ExecutionMode::Local,
        Some("remote") => ExecutionMode::Remote,
        _ if attrs.operations => ExecutionMode::Remote,
        _ => ExecutionMode::Local,
    };

    let terraform_version = match attrs.terraform_version.as_deref() {
        Some(version) => enforce_max_version(version, &name, report),
        None => MAX_TERRAFORM_VERSION.to_string(),
    };

    let vcs = attrs.vcs_repo.as_ref().and_then(|repo| {
        let identifier = repo
            .display_identifier
            .clone()
            .or_else(|| repo.identifier.clone())?;

        let mut trigger_patterns = Vec::new();
        for pattern in &attrs.trigger_patterns {
            if validate_trigger_pattern(pattern) {
                trigger_patterns.push(pattern.clone());
            } else {
                report.warn(
                    WarningKind::InvalidPattern,
                    Some(&name),
                    format!("invalid trigger pattern: {:?}", pattern),
                );
            }
        }

        Some(VcsSpec {
            identifier,
            branch: repo.branch.clone(),
            dry_runs_enabled: attrs.speculative_enabled,
            ingress_submodules: repo.ingress_submodules,
            trigger_prefixes: attrs.trigger_prefixes.clone(),
            trigger_patterns,
        })
    });

    WorkspaceSpec {
        name,
        execution_mode,
        auto_apply: attrs.auto_apply,
        terraform_version,
        working_directory: attrs.working_directory.clone(),
        deletion_protection: !config.disable_deletion_protection,
        global_remote_state: attrs.global_remote_state,
        vcs,
        wants_agent_pool: source.has_agent_pool(),
    }
}

/// References to the surrounding generated blocks a workspace resource
/// points at.
#[derive(Debug, Default, Clone)]
pub struct BlockRefs {
    pub environment: Option<HclValue>,
    pub vcs_provider: Option<HclValue>,
    pub provider_configuration: Option<HclValue>,
    pub agent_pool: Option<HclValue>,
}

/// The generated resource mirroring a workspace created this run. The
/// attributes match what was sent to the API, so a plan against the
/// generated code shows no diff.
pub fn workspace_block(spec: &WorkspaceSpec, refs: &BlockRefs, scalr_id: &str) -> HclBlock {
    let mut block = HclBlock::resource("scalr_workspace", &spec.name);
    block.set("name", HclValue::String(spec.name.clone()));
    block.set("auto_apply", HclValue::Bool(spec.auto_apply));
    block.set(
        "execution_mode",
        HclValue::String(spec.execution_mode.as_str().to_string()),
    );
    block.set(
        "terraform_version",
        HclValue::String(spec.terraform_version.clone()),
    );
    block.set_opt(
        "working_directory",
        spec.working_directory.clone().map(HclValue::String),
    );
    block.set_opt("environment_id", refs.environment.clone());
    block.set(
        "deletion_protection_enabled",
        HclValue::Bool(spec.deletion_protection),
    );

    if spec.global_remote_state {
        block.set("remote_state_consumers", HclValue::Raw("[\"*\"]".into()));
    }

    if let Some(vcs) = &spec.vcs {
        let mut repo = IndexMap::new();
        repo.insert(
            "identifier".to_string(),
            HclValue::String(vcs.identifier.clone()),
        );
        repo.insert(
            "dry_runs_enabled".to_string(),
            HclValue::Bool(vcs.dry_runs_enabled),
        );
        if let Some(branch) = &vcs.branch {
            repo.insert("branch".to_string(), HclValue::String(branch.clone()));
        }
        repo.insert(
            "ingress_submodules".to_string(),
            HclValue::Bool(vcs.ingress_submodules),
        );
        if !vcs.trigger_prefixes.is_empty() {
            repo.insert(
                "trigger_prefixes".to_string(),
                HclValue::List(
                    vcs.trigger_prefixes
                        .iter()
                        .cloned()
                        .map(HclValue::String)
                        .collect(),
                ),
            );
        }
        if let Some(patterns) = vcs.trigger_patterns_joined() {
            repo.insert("trigger_patterns".to_string(), HclValue::String(patterns));
        }
        block.set("vcs_repo", HclValue::Block(repo));
        if let Some(vcs_ref) = &refs.vcs_provider {
            block.set("vcs_provider_id", vcs_ref.clone());
        }
    }

    if let Some(pc_ref) = &refs.provider_configuration {
        let mut link = IndexMap::new();
        link.insert("id".to_string(), pc_ref.clone());
        block.set("provider_configuration", HclValue::Block(link));
    }

    if spec.wants_agent_pool {
        if let Some(pool_ref) = &refs.agent_pool {
            block.set("agent_pool_id", pool_ref.clone());
        }
    }

    block.with_id(scalr_id)
}
