use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info};

use crate::api::scalr::{Ensured, ScalrClient};
use crate::api::tfc::{TfcClient, TfcWorkspace};
use crate::api::ApiClient;
use crate::config::{MigrationConfig, MAX_TERRAFORM_VERSION};
use crate::error::{MigrateError, MigrateResult};
use crate::export::{self, BackendConfig};
use crate::hcl::{HclBlock, HclValue, ResourceSet};
use crate::mapper::{self, BlockRefs, ExecutionMode, WorkspaceSpec};
use crate::pattern::PatternList;
use crate::report::{RunReport, UnitStatus, WarningKind, WorkspaceOutcome};
use crate::resolver::{self, MigrationUnit};
use crate::state;
use crate::variables;

/// Account-scoped shell variables the generated backend needs at apply
/// time.
const BACKEND_SECRET_KEYS: [&str; 4] = [
    "SCALR_HOSTNAME",
    "SCALR_TOKEN",
    "TFE_HOSTNAME",
    "TFE_TOKEN",
];

/// Overall verdict of one run. Only fatal errors (surfaced as `Err` from
/// [`Orchestrator::run`]) make the process exit non-zero; failed or
/// skipped workspaces are reported here.
#[derive(Debug)]
pub struct RunVerdict {
    pub migrated: usize,
    pub failed: usize,
    pub skipped: usize,
    pub warnings: usize,
}

/// Immutable context shared by every workspace unit. The rate limiter
/// inside each API client and the report are the only things the units
/// mutate concurrently.
struct Shared {
    config: MigrationConfig,
    tfc: TfcClient,
    scalr: ScalrClient,
    report: Arc<RunReport>,
    skip_variables: PatternList,
    environment_id: String,
    environment_ref: HclValue,
    vcs: Option<LinkedId>,
    pc: Option<LinkedId>,
    agent_pool: Option<LinkedId>,
}

/// A named destination object resolved once during enumeration, plus the
/// data-source reference generated code uses for it.
struct LinkedId {
    id: String,
    reference: HclValue,
}

struct UnitResult {
    name: String,
    tfc_id: String,
    scalr_id: Option<String>,
    producers: Vec<String>,
    source_locked: bool,
    blocks: Vec<HclBlock>,
    outcome: WorkspaceOutcome,
}

pub struct Orchestrator {
    config: MigrationConfig,
    tfc: TfcClient,
    scalr: ScalrClient,
    report: Arc<RunReport>,
    cancelled: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(config: MigrationConfig) -> MigrateResult<Self> {
        config.validate()?;

        let tfc_api = ApiClient::new(
            &config.tfc_hostname,
            &config.tfc_token,
            "v2",
            config.rate_limit,
            config.max_retries,
        )?;
        let scalr_api = ApiClient::new(
            &config.scalr_hostname,
            &config.scalr_token,
            "iacp/v3",
            config.rate_limit,
            config.max_retries,
        )?;

        Ok(Orchestrator {
            config,
            tfc: TfcClient::new(tfc_api),
            scalr: ScalrClient::new(scalr_api),
            report: Arc::new(RunReport::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn report(&self) -> Arc<RunReport> {
        Arc::clone(&self.report)
    }

    /// Flag checked between unit launches; in-flight units always finish,
    /// so cancellation never leaves a workspace half-created.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// Drive the whole migration: enumerate, resolve, migrate per
    /// workspace, generate artifacts, lock the source.
    pub async fn run(&self) -> MigrateResult<RunVerdict> {
        let config = &self.config;
        let report = Arc::clone(&self.report);

        // ---- Enumerating -------------------------------------------------
        RunReport::section("Preparing migration");

        let account_id = self.scalr.get_account_id().await?;
        self.tfc.get_organization(&config.tfc_organization).await?;

        let project_id = match &config.tfc_project {
            Some(project_name) => {
                let project = self
                    .tfc
                    .get_project(&config.tfc_organization, project_name)
                    .await
                    .map_err(MigrateError::Api)?;
                match project {
                    Some(project) => {
                        info!("Filtering workspaces by project '{}'", project_name);
                        Some(project.id)
                    }
                    None => {
                        report.warn(
                            WarningKind::MissingProject,
                            None,
                            format!(
                                "project '{}' not found in organization '{}'; migrating without the filter",
                                project_name, config.tfc_organization
                            ),
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let mut resource_set = ResourceSet::new();

        let vcs = match &config.vcs_name {
            Some(name) => {
                let provider = self.scalr.find_vcs_provider(name).await?;
                let data = HclBlock::data("scalr_vcs_provider", name);
                let reference = data.id_ref();
                resource_set.add({
                    let mut block = data;
                    block.set("name", HclValue::String(name.clone()));
                    block
                });
                Some(LinkedId {
                    id: provider.id,
                    reference,
                })
            }
            None => None,
        };

        let pc = match &config.pc_name {
            Some(name) => {
                let provider_config = self.scalr.find_provider_configuration(name).await?;
                let data = HclBlock::data("scalr_provider_configuration", name);
                let reference = data.id_ref();
                resource_set.add({
                    let mut block = data;
                    block.set("name", HclValue::String(name.clone()));
                    block
                });
                Some((provider_config, reference))
            }
            None => None,
        };

        let agent_pool = match &config.agent_pool_name {
            Some(name) => {
                let pool = self.scalr.find_agent_pool(name).await?;
                let data = HclBlock::data("scalr_agent_pool", name);
                let reference = data.id_ref();
                resource_set.add({
                    let mut block = data;
                    block.set("name", HclValue::String(name.clone()));
                    block
                });
                Some(LinkedId {
                    id: pool.id,
                    reference,
                })
            }
            None => None,
        };

        if !config.skip_backend_secrets {
            self.init_backend_secrets(&account_id).await?;
        }

        // Management environment and workspace carry the generated code
        // itself; they are deliberately absent from the artifact set.
        info!(
            "Ensuring management environment '{}'",
            config.management_env_name
        );
        let management_env = self
            .scalr
            .get_or_create_environment(&config.management_env_name, &account_id)
            .await
            .map_err(MigrateError::Api)?;
        self.ensure_management_workspace(management_env.value().id.as_str())
            .await?;

        info!(
            "Ensuring destination environment '{}'",
            config.environment_name()
        );
        let environment = self
            .scalr
            .get_or_create_environment(config.environment_name(), &account_id)
            .await
            .map_err(MigrateError::Api)?;
        let environment_id = environment.value().id.clone();

        let environment_block = match &environment {
            Ensured::Created(env) => {
                let mut block = HclBlock::resource("scalr_environment", config.environment_name());
                block.set(
                    "name",
                    HclValue::String(config.environment_name().to_string()),
                );
                block.with_id(&env.id)
            }
            Ensured::Existing(_) => {
                let mut block = HclBlock::data("scalr_environment", config.environment_name());
                block.set(
                    "name",
                    HclValue::String(config.environment_name().to_string()),
                );
                block
            }
        };
        let environment_ref = environment_block.id_ref();
        resource_set.add(environment_block);

        let pc = match pc {
            Some((provider_config, reference)) => {
                self.scalr
                    .share_provider_configuration(&provider_config, &environment_id)
                    .await
                    .map_err(MigrateError::Api)?;
                Some(LinkedId {
                    id: provider_config.id,
                    reference,
                })
            }
            None => None,
        };

        let workspaces = self
            .tfc
            .list_workspaces(&config.tfc_organization, project_id.as_deref())
            .await
            .map_err(|e| {
                MigrateError::Fatal(format!("cannot enumerate source workspaces: {}", e))
            })?;

        let selection = PatternList::parse(&config.workspaces);
        let mut selected = Vec::new();
        for workspace in workspaces {
            if selection.is_match_any(workspace.name()) {
                selected.push(workspace);
            } else {
                report.record(WorkspaceOutcome::skipped(
                    workspace.name(),
                    "not selected",
                ));
            }
        }
        info!("{} workspace(s) selected for migration", selected.len());

        let consumers = self.collect_consumers(&selected).await;

        // ---- Resolving ---------------------------------------------------
        let plan = resolver::resolve(selected, &consumers, &report);

        // ---- PerWorkspaceMigration ---------------------------------------
        RunReport::section("Migrating workspaces");

        let shared = Arc::new(Shared {
            config: config.clone(),
            tfc: self.tfc.clone(),
            scalr: self.scalr.clone(),
            report: Arc::clone(&report),
            skip_variables: PatternList::parse(config.skip_variables.as_deref().unwrap_or("")),
            environment_id,
            environment_ref,
            vcs,
            pc,
            agent_pool,
        });

        let results = self.run_units(plan, Arc::clone(&shared)).await;

        // Producer blocks list their consumers, mirroring the sharing
        // relations actually established.
        let names_by_id: HashMap<String, String> = results
            .iter()
            .map(|r| (r.tfc_id.clone(), r.name.clone()))
            .collect();
        let succeeded: HashMap<String, bool> = results
            .iter()
            .map(|r| (r.tfc_id.clone(), r.outcome.status == UnitStatus::Done))
            .collect();

        for result in &results {
            resource_set.extend_blocks(result.blocks.clone());
        }
        for result in &results {
            if result.outcome.status != UnitStatus::Done {
                continue;
            }
            for producer_id in &result.producers {
                if !succeeded.get(producer_id).copied().unwrap_or(false) {
                    continue;
                }
                let Some(producer_name) = names_by_id.get(producer_id) else {
                    continue;
                };
                let consumer_address = format!(
                    "scalr_workspace.{}.id",
                    crate::hcl::sanitize_name(&result.name)
                );
                if let Some(block) = resource_set.get_resource_mut("scalr_workspace", producer_name)
                {
                    let entry = block
                        .attrs
                        .entry("remote_state_consumers".to_string())
                        .or_insert_with(|| HclValue::List(Vec::new()));
                    if let HclValue::List(items) = entry {
                        items.push(HclValue::Ref(consumer_address));
                    }
                }
            }
        }

        // ---- Generating --------------------------------------------------
        let backend = BackendConfig {
            hostname: config.scalr_hostname.clone(),
            organization: config.management_env_name.clone(),
            workspace: config.management_workspace_name().to_string(),
        };
        export::write_artifacts(&resource_set, &backend, Path::new(&config.output_dir()))
            .map_err(|e| MigrateError::Fatal(format!("cannot write artifacts: {}", e)))?;

        // ---- Locking -----------------------------------------------------
        if config.lock {
            self.lock_source_workspaces(&results).await;
        }

        // ---- Done --------------------------------------------------------
        report.print_summary();
        Ok(RunVerdict {
            migrated: report.migrated().len(),
            failed: report.failed().len(),
            skipped: report.skipped().len(),
            warnings: report.warnings().len(),
        })
    }

    /// Fetch the explicit remote-state consumer lists needed for the
    /// dependency graph. Enumeration failures degrade: the workspace
    /// migrates without its sharing relations.
    async fn collect_consumers(
        &self,
        selected: &[TfcWorkspace],
    ) -> HashMap<String, Vec<String>> {
        let mut consumers = HashMap::new();
        for workspace in selected {
            if !workspace.has_explicit_consumers() {
                continue;
            }
            match self.tfc.list_remote_state_consumers(&workspace.id).await {
                Ok(ids) => {
                    consumers.insert(
                        workspace.id.clone(),
                        ids.into_iter().map(|r| r.id).collect(),
                    );
                }
                Err(err) => {
                    self.report.warn(
                        WarningKind::DroppedConsumer,
                        Some(workspace.name()),
                        format!("cannot list remote-state consumers: {}", err),
                    );
                }
            }
        }
        consumers
    }

    async fn init_backend_secrets(&self, account_id: &str) -> MigrateResult<()> {
        let config = &self.config;
        let values: [(&str, &str); 4] = [
            (BACKEND_SECRET_KEYS[0], &config.scalr_hostname),
            (BACKEND_SECRET_KEYS[1], &config.scalr_token),
            (BACKEND_SECRET_KEYS[2], &config.tfc_hostname),
            (BACKEND_SECRET_KEYS[3], &config.tfc_token),
        ];

        for (key, value) in values {
            let existing = self
                .scalr
                .list_account_variables(account_id, key)
                .await
                .map_err(MigrateError::Api)?;
            if !existing.is_empty() {
                continue;
            }
            let relationships = serde_json::json!({
                "account": {
                    "data": { "type": "accounts", "id": account_id }
                }
            });
            self.scalr
                .upsert_variable(
                    key,
                    value,
                    "shell",
                    true,
                    false,
                    Some("Created by the migrator"),
                    relationships,
                )
                .await
                .map_err(MigrateError::Api)?;
        }
        info!("Initialized backend secrets");
        Ok(())
    }

    async fn ensure_management_workspace(&self, management_env_id: &str) -> MigrateResult<()> {
        let config = &self.config;
        let name = config.management_workspace_name();

        if self
            .scalr
            .find_workspace(management_env_id, name)
            .await
            .map_err(MigrateError::Api)?
            .is_some()
        {
            debug!("Management workspace '{}' already exists", name);
            return Ok(());
        }

        let spec = WorkspaceSpec {
            name: name.to_string(),
            execution_mode: ExecutionMode::Remote,
            auto_apply: false,
            terraform_version: MAX_TERRAFORM_VERSION.to_string(),
            working_directory: None,
            deletion_protection: !config.disable_deletion_protection,
            global_remote_state: false,
            vcs: None,
            wants_agent_pool: false,
        };
        self.scalr
            .create_workspace(management_env_id, &spec, None, None)
            .await
            .map_err(MigrateError::Api)?;
        info!("Created management workspace '{}'", name);
        Ok(())
    }

    /// Execute the plan wave by wave on a bounded worker pool. Units in a
    /// wave run concurrently; a consumer only launches once the wave
    /// holding its producers has fully drained, which is how the
    /// producer-before-consumer constraint is enforced.
    async fn run_units(
        &self,
        plan: resolver::MigrationPlan,
        shared: Arc<Shared>,
    ) -> Vec<UnitResult> {
        let worker_slots = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut id_map: HashMap<String, String> = HashMap::new();
        let mut results: Vec<UnitResult> = Vec::new();

        for wave in plan.waves {
            if self.cancelled.load(Ordering::SeqCst) {
                for unit in wave {
                    self.report.record(WorkspaceOutcome::skipped(
                        unit.workspace.name(),
                        "cancelled",
                    ));
                }
                continue;
            }

            let producer_ids = Arc::new(id_map.clone());
            let mut handles = Vec::new();
            for unit in wave {
                if self.cancelled.load(Ordering::SeqCst) {
                    self.report.record(WorkspaceOutcome::skipped(
                        unit.workspace.name(),
                        "cancelled",
                    ));
                    continue;
                }
                let shared = Arc::clone(&shared);
                let producer_ids = Arc::clone(&producer_ids);
                let slots = Arc::clone(&worker_slots);
                let name = unit.workspace.name().to_string();
                let handle = tokio::spawn(async move {
                    let _permit = slots.acquire_owned().await.ok();
                    migrate_unit(shared, unit, producer_ids).await
                });
                handles.push((name, handle));
            }

            // Collect in spawn order so artifacts stay deterministic.
            for (name, handle) in handles {
                match handle.await {
                    Ok(result) => {
                        if let Some(scalr_id) = &result.scalr_id {
                            id_map.insert(result.tfc_id.clone(), scalr_id.clone());
                        }
                        self.report.record(result.outcome.clone());
                        results.push(result);
                    }
                    Err(join_err) => {
                        error!("Worker for '{}' panicked: {}", name, join_err);
                        self.report
                            .record(WorkspaceOutcome::failed(&name, "internal worker failure"));
                    }
                }
            }
        }
        results
    }

    /// Best-effort source-side lock; failures only add warnings and never
    /// change the run verdict.
    async fn lock_source_workspaces(&self, results: &[UnitResult]) {
        RunReport::section("Locking source workspaces");
        let env_name = self.config.environment_name();
        for result in results {
            if result.outcome.status != UnitStatus::Done {
                continue;
            }
            if result.source_locked {
                info!("[{}] Workspace is already locked", result.name);
                continue;
            }
            let reason = format!(
                "Workspace is migrated to the Scalr environment '{}' with name '{}'.",
                env_name, result.name
            );
            match self.tfc.lock_workspace(&result.tfc_id, &reason).await {
                Ok(()) => info!("[{}] Source workspace locked", result.name),
                Err(err) => self.report.warn(
                    WarningKind::LockFailed,
                    Some(&result.name),
                    format!("cannot lock source workspace: {}", err),
                ),
            }
        }
    }
}

/// Migrate one workspace through its per-unit states: mapped, variables
/// migrated, state migrated, linked. Any failure marks this unit failed
/// and the run carries on.
async fn migrate_unit(
    shared: Arc<Shared>,
    unit: MigrationUnit,
    producer_ids: Arc<HashMap<String, String>>,
) -> UnitResult {
    let name = unit.workspace.name().to_string();
    let tfc_id = unit.workspace.id.clone();
    let source_locked = unit.workspace.attributes.locked;
    let producers = unit.producers.clone();

    match migrate_unit_inner(&shared, &unit, &producer_ids).await {
        Ok((scalr_id, blocks, outcome)) => UnitResult {
            name,
            tfc_id,
            scalr_id: Some(scalr_id),
            producers,
            source_locked,
            blocks,
            outcome,
        },
        Err(err) => {
            error!("[{}] Migration failed: {}", name, err);
            UnitResult {
                outcome: WorkspaceOutcome::failed(&name, &err.to_string()),
                name,
                tfc_id,
                scalr_id: None,
                producers,
                source_locked,
                blocks: Vec::new(),
            }
        }
    }
}

async fn migrate_unit_inner(
    shared: &Shared,
    unit: &MigrationUnit,
    producer_ids: &HashMap<String, String>,
) -> Result<(String, Vec<HclBlock>, WorkspaceOutcome), MigrateError> {
    let config = &shared.config;
    let report = shared.report.as_ref();
    let source = &unit.workspace;
    let name = source.name();
    info!(
        "Migrating workspace '{}' into '{}'",
        name,
        config.environment_name()
    );

    // mapped
    let spec = mapper::map_workspace(source, config, report);

    // The workspace itself: reuse when present, create when absent.
    let existing = shared
        .scalr
        .find_workspace(&shared.environment_id, name)
        .await
        .map_err(MigrateError::Api)?;

    let mut blocks = Vec::new();
    let (scalr_id, workspace_ref, workspace_created) = match existing {
        Some(workspace) => {
            info!("[{}] Workspace already exists, reusing it", name);
            let mut block = HclBlock::data("scalr_workspace", name);
            block.set("name", HclValue::String(name.to_string()));
            let reference = block.id_ref();
            blocks.push(block);
            (workspace.id, reference, false)
        }
        None if config.skip_workspace_creation => {
            return Err(MigrateError::MissingData(format!(
                "workspace '{}' not found in the destination and creation is skipped",
                name
            )));
        }
        None => {
            let vcs_id = match (&spec.vcs, &shared.vcs) {
                (Some(_), Some(vcs)) => Some(vcs.id.as_str()),
                _ => None,
            };
            let pool_id = match (&spec, &shared.agent_pool) {
                (spec, Some(pool)) if spec.wants_agent_pool => Some(pool.id.as_str()),
                _ => None,
            };
            let created = shared
                .scalr
                .create_workspace(&shared.environment_id, &spec, vcs_id, pool_id)
                .await
                .map_err(MigrateError::Api)?;

            if let Some(pc) = &shared.pc {
                shared
                    .scalr
                    .link_provider_configuration(&created.id, &pc.id)
                    .await
                    .map_err(MigrateError::Api)?;
                debug!("[{}] Linked provider configuration", name);
            }

            let refs = BlockRefs {
                environment: Some(shared.environment_ref.clone()),
                vcs_provider: shared.vcs.as_ref().map(|v| v.reference.clone()),
                provider_configuration: shared.pc.as_ref().map(|p| p.reference.clone()),
                agent_pool: shared.agent_pool.as_ref().map(|p| p.reference.clone()),
            };
            let block = mapper::workspace_block(&spec, &refs, &created.id);
            let reference = block.id_ref();
            blocks.push(block);
            (created.id, reference, true)
        }
    };

    // variables-migrated
    let variable_result = variables::migrate_workspace_variables(
        &shared.tfc,
        &shared.scalr,
        config,
        &shared.skip_variables,
        source,
        &scalr_id,
        workspace_ref,
        report,
    )
    .await
    .map_err(MigrateError::Api)?;
    blocks.extend(variable_result.blocks);

    // state-migrated
    let state_serial = state::transfer_state(
        &shared.tfc,
        &shared.scalr,
        config,
        source,
        &scalr_id,
        report,
    )
    .await
    .map_err(MigrateError::Api)?;

    // linked: attach this workspace as consumer on each of its producers,
    // which reached a terminal state in an earlier wave.
    for producer in &unit.producers {
        match producer_ids.get(producer) {
            Some(producer_scalr_id) => {
                shared
                    .scalr
                    .add_remote_state_consumers(producer_scalr_id, &[scalr_id.clone()])
                    .await
                    .map_err(MigrateError::Api)?;
                debug!("[{}] Linked as remote-state consumer of {}", name, producer);
            }
            None => {
                report.warn(
                    WarningKind::DroppedConsumer,
                    Some(name),
                    format!(
                        "producer workspace '{}' did not migrate; state-sharing link dropped",
                        producer
                    ),
                );
            }
        }
    }

    let outcome = WorkspaceOutcome {
        name: name.to_string(),
        status: UnitStatus::Done,
        workspace_created,
        variables_created: variable_result.created,
        variables_skipped: variable_result.skipped,
        state_serial,
    };
    Ok((scalr_id, blocks, outcome))
}
