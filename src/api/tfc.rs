use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{ApiClient, Listing, ResourceIdentifier, Single};
use crate::error::{ApiError, MigrateError};

//
// Typed source-platform resources. Everything the engine consumes is
// decoded here so the rest of the code never touches raw JSON shapes.
//

#[derive(Debug, Clone, Deserialize)]
pub struct TfcOrganization {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TfcProject {
    pub id: String,
    pub attributes: TfcProjectAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TfcProjectAttributes {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TfcWorkspace {
    pub id: String,
    pub attributes: TfcWorkspaceAttributes,
    #[serde(default)]
    pub relationships: TfcWorkspaceRelationships,
}

impl TfcWorkspace {
    pub fn name(&self) -> &str {
        &self.attributes.name
    }

    pub fn has_agent_pool(&self) -> bool {
        self.relationships
            .agent_pool
            .as_ref()
            .and_then(|r| r.data.as_ref())
            .is_some()
    }

    pub fn current_state_link(&self) -> Option<&str> {
        self.relationships
            .current_state_version
            .as_ref()
            .and_then(|r| r.links.as_ref())
            .and_then(|l| l.related.as_deref())
    }

    /// Whether this workspace shares state with an explicit consumer list
    /// (as opposed to globally or not at all).
    pub fn has_explicit_consumers(&self) -> bool {
        !self.attributes.global_remote_state
            && self.relationships.remote_state_consumers.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TfcWorkspaceAttributes {
    pub name: String,
    #[serde(default)]
    pub auto_apply: bool,
    #[serde(default = "default_true")]
    pub operations: bool,
    #[serde(default)]
    pub execution_mode: Option<String>,
    #[serde(default)]
    pub terraform_version: Option<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub speculative_enabled: bool,
    #[serde(default)]
    pub trigger_prefixes: Vec<String>,
    #[serde(default)]
    pub trigger_patterns: Vec<String>,
    #[serde(default)]
    pub global_remote_state: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub vcs_repo: Option<TfcVcsRepo>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TfcVcsRepo {
    #[serde(default)]
    pub display_identifier: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub ingress_submodules: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TfcWorkspaceRelationships {
    #[serde(default)]
    pub current_state_version: Option<RelationshipLinks>,
    #[serde(default)]
    pub remote_state_consumers: Option<RelationshipLinks>,
    #[serde(default)]
    pub agent_pool: Option<RelationshipData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipLinks {
    #[serde(default)]
    pub links: Option<RelatedLinks>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelatedLinks {
    #[serde(default)]
    pub related: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipData {
    #[serde(default)]
    pub data: Option<ResourceIdentifier>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TfcVariable {
    pub id: String,
    pub attributes: TfcVariableAttributes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TfcVariableAttributes {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    pub category: String,
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub hcl: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TfcRun {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TfcStateVersion {
    pub id: String,
    pub attributes: TfcStateVersionAttributes,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TfcStateVersionAttributes {
    pub serial: u64,
    #[serde(default)]
    pub hosted_state_download_url: Option<String>,
}

/// The slice of a plan artifact the secret recovery needs: resolved input
/// values plus the root module's variable declarations (which carry the
/// sensitivity markers).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanDocument {
    #[serde(default)]
    pub variables: HashMap<String, PlanVariable>,
    #[serde(default)]
    pub configuration: PlanConfiguration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanVariable {
    pub value: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanConfiguration {
    #[serde(default)]
    pub root_module: PlanRootModule,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanRootModule {
    #[serde(default)]
    pub variables: HashMap<String, PlanConfigVariable>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanConfigVariable {
    #[serde(default)]
    pub sensitive: bool,
}

impl PlanDocument {
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

/// Read-only client for the source platform.
#[derive(Debug, Clone)]
pub struct TfcClient {
    api: ApiClient,
}

impl TfcClient {
    pub fn new(api: ApiClient) -> Self {
        TfcClient { api }
    }

    /// Fails fatally: if the organization cannot be fetched there is
    /// nothing to migrate and nothing has been written yet.
    pub async fn get_organization(&self, name: &str) -> Result<TfcOrganization, MigrateError> {
        let response: Single<TfcOrganization> = self
            .api
            .get(&format!("organizations/{}", name), &[])
            .await
            .map_err(|e| {
                MigrateError::Fatal(format!("cannot reach organization '{}': {}", name, e))
            })?;
        Ok(response.data)
    }

    pub async fn get_project(
        &self,
        org: &str,
        project_name: &str,
    ) -> Result<Option<TfcProject>, ApiError> {
        let result: Result<Listing<TfcProject>, ApiError> = self
            .api
            .get(
                &format!("organizations/{}/projects", org),
                &[("filter[names]", project_name.to_string())],
            )
            .await;
        match result {
            Ok(listing) => Ok(listing.data.into_iter().next()),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Every page is drained before returning; the dependency resolver
    /// must see the complete workspace set.
    pub async fn list_workspaces(
        &self,
        org: &str,
        project_id: Option<&str>,
    ) -> Result<Vec<TfcWorkspace>, ApiError> {
        let mut query = Vec::new();
        if let Some(project_id) = project_id {
            query.push(("filter[project][id]", project_id.to_string()));
        }
        let workspaces = self
            .api
            .get_all_pages(&format!("organizations/{}/workspaces", org), &query)
            .await?;
        info!("Enumerated {} workspaces in '{}'", workspaces.len(), org);
        Ok(workspaces)
    }

    pub async fn list_workspace_vars(
        &self,
        org: &str,
        workspace_name: &str,
    ) -> Result<Vec<TfcVariable>, ApiError> {
        let listing: Listing<TfcVariable> = self
            .api
            .get(
                "vars",
                &[
                    ("filter[workspace][name]", workspace_name.to_string()),
                    ("filter[organization][name]", org.to_string()),
                ],
            )
            .await?;
        Ok(listing.data)
    }

    /// Runs, newest first, one page at a time. The secret recovery walks
    /// these until it finds a run with a persisted plan artifact.
    pub async fn list_runs_page(
        &self,
        workspace_id: &str,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<TfcRun>, Option<u64>), ApiError> {
        let listing: Listing<TfcRun> = self
            .api
            .get(
                &format!("workspaces/{}/runs", workspace_id),
                &[
                    ("page[size]", page_size.to_string()),
                    ("page[number]", page.to_string()),
                ],
            )
            .await?;
        let next = listing.next_page();
        Ok((listing.data, next))
    }

    /// The archived plan artifact, or `None` when the run never persisted
    /// one. Any 4xx here means "no artifact", not a failure.
    pub async fn get_run_plan_json(&self, run_id: &str) -> Result<Option<PlanDocument>, ApiError> {
        let result: Result<PlanDocument, ApiError> = self
            .api
            .get(&format!("runs/{}/plan/json-output", run_id), &[])
            .await;
        match result {
            Ok(plan) => Ok(Some(plan)),
            Err(err) if err.status().map_or(false, |s| (400..500).contains(&s)) => {
                debug!("Plan artifact unavailable for run {}", run_id);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn get_state_version(
        &self,
        related_url: &str,
    ) -> Result<TfcStateVersion, ApiError> {
        let response: Single<TfcStateVersion> = self.api.get_related(related_url).await?;
        Ok(response.data)
    }

    /// Full state-version history for a workspace, used when the run
    /// preserves history. Ordered by the API newest-first; callers sort.
    pub async fn list_state_versions(
        &self,
        org: &str,
        workspace_name: &str,
    ) -> Result<Vec<TfcStateVersion>, ApiError> {
        self.api
            .get_all_pages(
                "state-versions",
                &[
                    ("filter[workspace][name]", workspace_name.to_string()),
                    ("filter[organization][name]", org.to_string()),
                ],
            )
            .await
    }

    /// The raw state payload behind a hosted-state-download-url.
    pub async fn download_state(&self, url: &str) -> Result<Value, ApiError> {
        self.api.get_url(url).await
    }

    pub async fn list_remote_state_consumers(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<ResourceIdentifier>, ApiError> {
        self.api
            .get_all_pages(
                &format!("workspaces/{}/relationships/remote-state-consumers", workspace_id),
                &[],
            )
            .await
    }

    /// The only source-side write: best-effort lock after migration.
    pub async fn lock_workspace(&self, workspace_id: &str, reason: &str) -> Result<(), ApiError> {
        let _: Value = self
            .api
            .post(
                &format!("workspaces/{}/actions/lock", workspace_id),
                json!({ "reason": reason }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_decodes_from_api_shape() {
        let json = r#"{
            "id": "ws-abc123",
            "type": "workspaces",
            "attributes": {
                "name": "prod-api",
                "auto-apply": true,
                "operations": true,
                "terraform-version": "1.7.0",
                "working-directory": "infra/",
                "speculative-enabled": true,
                "trigger-prefixes": ["modules/"],
                "trigger-patterns": ["infra/**/*.tf"],
                "global-remote-state": false,
                "locked": false,
                "vcs-repo": {
                    "display-identifier": "acme/infra",
                    "branch": "main",
                    "ingress-submodules": false
                }
            },
            "relationships": {
                "current-state-version": {
                    "links": {"related": "/api/v2/workspaces/ws-abc123/current-state-version"}
                },
                "remote-state-consumers": {
                    "links": {"related": "/api/v2/workspaces/ws-abc123/relationships/remote-state-consumers"}
                }
            }
        }"#;

        let ws: TfcWorkspace = serde_json::from_str(json).unwrap();
        assert_eq!(ws.name(), "prod-api");
        assert!(ws.attributes.auto_apply);
        assert_eq!(ws.attributes.terraform_version.as_deref(), Some("1.7.0"));
        assert_eq!(
            ws.attributes.vcs_repo.as_ref().unwrap().display_identifier.as_deref(),
            Some("acme/infra")
        );
        assert!(ws.current_state_link().is_some());
        assert!(ws.has_explicit_consumers());
        assert!(!ws.has_agent_pool());
    }

    #[test]
    fn workspace_minimal_shape() {
        let json = r#"{"id": "ws-min", "attributes": {"name": "bare"}}"#;
        let ws: TfcWorkspace = serde_json::from_str(json).unwrap();
        assert!(ws.attributes.operations);
        assert!(ws.attributes.trigger_patterns.is_empty());
        assert!(ws.current_state_link().is_none());
        assert!(!ws.has_explicit_consumers());
    }

    #[test]
    fn plan_document_extracts_sensitive_markers() {
        let json = r#"{
            "variables": {
                "db_password": {"value": "hunter2"},
                "region": {"value": "eu-west-1"}
            },
            "configuration": {
                "root_module": {
                    "variables": {
                        "db_password": {"sensitive": true},
                        "region": {}
                    }
                }
            }
        }"#;
        let plan: PlanDocument = serde_json::from_str(json).unwrap();
        assert!(plan.configuration.root_module.variables["db_password"].sensitive);
        assert!(!plan.configuration.root_module.variables["region"].sensitive);
        assert_eq!(plan.variables["db_password"].value, Value::from("hunter2"));
    }

    #[test]
    fn variable_decodes_without_value() {
        let json = r#"{
            "id": "var-1",
            "attributes": {"key": "DB_SECRET_KEY", "category": "env", "sensitive": true}
        }"#;
        let var: TfcVariable = serde_json::from_str(json).unwrap();
        assert_eq!(var.attributes.key, "DB_SECRET_KEY");
        assert!(var.attributes.sensitive);
        assert!(var.attributes.value.is_none());
    }
}
