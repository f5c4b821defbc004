use serde_json::{json, Value};
use tracing::{debug, info};

use crate::api::scalr::{ScalrClient, VariableUpsert};
use crate::api::tfc::{PlanDocument, TfcClient, TfcVariable, TfcWorkspace};
use crate::config::{MigrationConfig, SensitiveEnvPolicy};
use crate::error::ApiError;
use crate::hcl::{sanitize_name, HclBlock, HclValue};
use crate::pattern::PatternList;
use crate::report::{RunReport, WarningKind};

const RUNS_PAGE_SIZE: u64 = 20;

#[derive(Debug, Default)]
pub struct VariableMigration {
    /// Generated blocks for variables created this run, in listing order.
    pub blocks: Vec<HclBlock>,
    pub created: usize,
    pub skipped: usize,
}

/// The destination calls shell variables what the source calls env.
pub fn scalr_category(category: &str) -> &str {
    if category == "env" {
        "shell"
    } else {
        category
    }
}

/// Look up a variable's resolved value in a plan artifact. Shell
/// variables only surface there through their `TF_VAR_` alias, so the
/// prefix is stripped before the lookup. The root module's declaration
/// must exist; values are never guessed from unrelated inputs.
pub fn plan_value_for(plan: &PlanDocument, key: &str) -> Option<String> {
    let terraform_key = key.strip_prefix("TF_VAR_").unwrap_or(key);
    plan.configuration
        .root_module
        .variables
        .get(terraform_key)?;
    let value = &plan.variables.get(terraform_key)?.value;
    Some(match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn workspace_relationships(workspace_id: &str) -> Value {
    json!({
        "workspace": {
            "data": { "type": "workspaces", "id": workspace_id }
        }
    })
}

/// The generated resource for one created variable. Resource names are
/// prefixed with the workspace so the same key in two workspaces cannot
/// collide in the artifact set.
pub fn variable_block(
    workspace_name: &str,
    key: &str,
    value: &str,
    category: &str,
    hcl: bool,
    description: Option<&str>,
    workspace_ref: HclValue,
) -> HclBlock {
    let mut block = HclBlock::resource(
        "scalr_variable",
        &format!("{}_{}", sanitize_name(workspace_name), sanitize_name(key)),
    );
    block.set("key", HclValue::String(key.to_string()));
    if let Some(description) = description {
        block.set("description", HclValue::String(description.to_string()));
    }
    block.set("value", HclValue::String(value.to_string()));
    block.set("category", HclValue::String(category.to_string()));
    block.set("workspace_id", workspace_ref);
    block.set("hcl", HclValue::Bool(hcl));
    block
}

/// Walk the workspace's runs newest-first until one of them has a
/// persisted plan artifact. A failed artifact fetch only skips that run.
async fn find_latest_plan(
    tfc: &TfcClient,
    workspace_id: &str,
    report: &RunReport,
    workspace_name: &str,
) -> Option<PlanDocument> {
    let mut page = 1;
    loop {
        let (runs, next) = match tfc.list_runs_page(workspace_id, page, RUNS_PAGE_SIZE).await {
            Ok(result) => result,
            Err(err) => {
                report.warn(
                    WarningKind::MissingPlan,
                    Some(workspace_name),
                    format!("cannot list runs: {}", err),
                );
                return None;
            }
        };
        for run in &runs {
            match tfc.get_run_plan_json(&run.id).await {
                Ok(Some(plan)) if !plan.is_empty() => {
                    debug!("Using plan artifact from run {}", run.id);
                    return Some(plan);
                }
                Ok(_) => continue,
                Err(err) => {
                    debug!("Plan fetch for run {} failed: {}", run.id, err);
                    continue;
                }
            }
        }
        match next {
            Some(n) if n > page => page = n,
            _ => return None,
        }
    }
}

/// Copy one workspace's variables into the destination. Non-sensitive
/// values copy directly; sensitive terraform values are recovered from
/// the most recent plan artifact or migrated as empty sensitive slots;
/// sensitive shell values follow the configured policy. Every omission
/// is logged.
#[allow(clippy::too_many_arguments)]
pub async fn migrate_workspace_variables(
    tfc: &TfcClient,
    scalr: &ScalrClient,
    config: &MigrationConfig,
    skip: &PatternList,
    source: &TfcWorkspace,
    scalr_workspace_id: &str,
    workspace_ref: HclValue,
    report: &RunReport,
) -> Result<VariableMigration, ApiError> {
    let mut result = VariableMigration::default();
    let workspace_name = source.name();

    if skip.matches_all() {
        info!("[{}] Skipping all variable migration as requested", workspace_name);
        return Ok(result);
    }

    let variables = tfc
        .list_workspace_vars(&config.tfc_organization, workspace_name)
        .await?;
    let relationships = workspace_relationships(scalr_workspace_id);

    // Sensitive variables whose values the listing API withholds; they
    // get a second chance through the plan artifact.
    let mut pending: Vec<&TfcVariable> = Vec::new();

    for variable in &variables {
        let attrs = &variable.attributes;
        let key = attrs.key.as_str();

        if skip.is_match_any(key) {
            info!("[{}] Skipping variable '{}' as requested", workspace_name, key);
            result.skipped += 1;
            continue;
        }

        if attrs.sensitive {
            let recoverable = attrs.category == "terraform"
                || (key.starts_with("TF_VAR_")
                    && config.sensitive_env_policy == SensitiveEnvPolicy::Recover);
            if recoverable {
                pending.push(variable);
            } else {
                report.warn(
                    WarningKind::SkippedVariable,
                    Some(workspace_name),
                    format!("sensitive {} variable '{}' skipped; value not recoverable", scalr_category(&attrs.category), key),
                );
                result.skipped += 1;
            }
            continue;
        }

        let category = scalr_category(&attrs.category);
        let value = attrs.value.clone().unwrap_or_default();
        let upsert = scalr
            .upsert_variable(
                key,
                &value,
                category,
                false,
                attrs.hcl,
                attrs.description.as_deref(),
                relationships.clone(),
            )
            .await?;
        match upsert {
            VariableUpsert::Created(_created) => {
                result.blocks.push(variable_block(
                    workspace_name,
                    key,
                    &value,
                    category,
                    attrs.hcl,
                    attrs.description.as_deref(),
                    workspace_ref.clone(),
                ));
                result.created += 1;
            }
            VariableUpsert::Existing => {
                result.skipped += 1;
            }
        }
    }

    if pending.is_empty() {
        return Ok(result);
    }

    let plan = find_latest_plan(tfc, &source.id, report, workspace_name).await;

    for variable in pending {
        let attrs = &variable.attributes;
        let key = attrs.key.as_str();
        let recovered = plan.as_ref().and_then(|p| plan_value_for(p, key));

        match recovered {
            Some(value) => {
                info!(
                    "[{}] Recovered sensitive variable '{}' from the plan artifact",
                    workspace_name, key
                );
                let category = scalr_category(&attrs.category);
                let upsert = scalr
                    .upsert_variable(
                        key,
                        &value,
                        category,
                        true,
                        attrs.hcl,
                        attrs.description.as_deref(),
                        relationships.clone(),
                    )
                    .await?;
                if let VariableUpsert::Created(_) = upsert {
                    result.blocks.push(variable_block(
                        workspace_name,
                        key,
                        &value,
                        category,
                        attrs.hcl,
                        attrs.description.as_deref(),
                        workspace_ref.clone(),
                    ));
                    result.created += 1;
                } else {
                    result.skipped += 1;
                }
            }
            None if attrs.category == "terraform" => {
                // Sensitivity is preserved; the value stays empty until
                // the operator fills it in.
                report.warn(
                    WarningKind::MissingPlan,
                    Some(workspace_name),
                    format!(
                        "no plan artifact value for sensitive variable '{}'; migrated with empty value",
                        key
                    ),
                );
                let upsert = scalr
                    .upsert_variable(
                        key,
                        "",
                        "terraform",
                        true,
                        attrs.hcl,
                        attrs.description.as_deref(),
                        relationships.clone(),
                    )
                    .await?;
                if let VariableUpsert::Created(_) = upsert {
                    result.blocks.push(variable_block(
                        workspace_name,
                        key,
                        "",
                        "terraform",
                        attrs.hcl,
                        attrs.description.as_deref(),
                        workspace_ref.clone(),
                    ));
                    result.created += 1;
                } else {
                    result.skipped += 1;
                }
            }
            None => {
                report.warn(
                    WarningKind::SkippedVariable,
                    Some(workspace_name),
                    format!(
                        "sensitive shell variable '{}' skipped; no plan artifact value",
                        key
                    ),
                );
                result.skipped += 1;
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(json_str: &str) -> PlanDocument {
        serde_json::from_str(json_str).unwrap()
    }

    #[test]
    fn maps_env_category_to_shell() {
        assert_eq!(scalr_category("env"), "shell");
        assert_eq!(scalr_category("terraform"), "terraform");
    }

    #[test]
    fn recovers_declared_sensitive_value() {
        let plan = plan(
            r#"{
                "variables": {"db_password": {"value": "hunter2"}},
                "configuration": {"root_module": {"variables": {"db_password": {"sensitive": true}}}}
            }"#,
        );
        assert_eq!(plan_value_for(&plan, "db_password").as_deref(), Some("hunter2"));
    }

    #[test]
    fn strips_tf_var_prefix_for_lookup() {
        let plan = plan(
            r#"{
                "variables": {"api_key": {"value": "k-123"}},
                "configuration": {"root_module": {"variables": {"api_key": {"sensitive": true}}}}
            }"#,
        );
        assert_eq!(plan_value_for(&plan, "TF_VAR_api_key").as_deref(), Some("k-123"));
    }

    #[test]
    fn undeclared_variable_is_not_recovered() {
        let plan = plan(
            r#"{
                "variables": {"stray": {"value": "x"}},
                "configuration": {"root_module": {"variables": {}}}
            }"#,
        );
        assert_eq!(plan_value_for(&plan, "stray"), None);
        assert_eq!(plan_value_for(&plan, "absent"), None);
    }

    #[test]
    fn non_string_values_serialize_to_json() {
        let plan = plan(
            r#"{
                "variables": {"replicas": {"value": {"min": 1, "max": 3}}},
                "configuration": {"root_module": {"variables": {"replicas": {}}}}
            }"#,
        );
        let value = plan_value_for(&plan, "replicas").unwrap();
        assert_eq!(value, r#"{"max":3,"min":1}"#);
    }

    #[test]
    fn variable_block_is_namespaced_by_workspace() {
        let block = variable_block(
            "prod-api",
            "region",
            "eu-west-1",
            "terraform",
            false,
            Some("deploy region"),
            HclValue::Ref("scalr_workspace.prod_api.id".into()),
        );
        assert_eq!(block.address(), "scalr_variable.prod_api_region");
        let rendered = block.render();
        assert!(rendered.contains("key = \"region\""));
        assert!(rendered.contains("workspace_id = scalr_workspace.prod_api.id"));
        assert!(rendered.contains("hcl = false"));
    }
}
