use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{ApiClient, Listing, Single};
use crate::error::{ApiError, MigrateError};
use crate::mapper::WorkspaceSpec;

#[derive(Debug, Clone, Deserialize)]
pub struct ScalrAccount {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScalrEnvironment {
    pub id: String,
    pub attributes: ScalrEnvironmentAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScalrEnvironmentAttributes {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScalrWorkspace {
    pub id: String,
    pub attributes: ScalrWorkspaceAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScalrWorkspaceAttributes {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScalrVariable {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScalrStateVersion {
    pub id: String,
    pub attributes: ScalrStateVersionAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScalrStateVersionAttributes {
    pub serial: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VcsProvider {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentPool {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Agent {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfiguration {
    pub id: String,
    pub attributes: ProviderConfigurationAttributes,
    #[serde(default)]
    pub relationships: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProviderConfigurationAttributes {
    pub name: String,
    #[serde(default)]
    pub is_shared: bool,
}

/// Result of an "ensure" call: whether the object was created by this run
/// or already existed in the destination.
#[derive(Debug, Clone)]
pub enum Ensured<T> {
    Created(T),
    Existing(T),
}

impl<T> Ensured<T> {
    pub fn value(&self) -> &T {
        match self {
            Ensured::Created(v) | Ensured::Existing(v) => v,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Ensured::Created(_))
    }
}

/// Outcome of a variable upsert; `Existing` carries no body because the
/// destination answers duplicates with a bare 422.
#[derive(Debug)]
pub enum VariableUpsert {
    Created(ScalrVariable),
    Existing,
}

/// Client for the destination platform. All mutating calls have ensure
/// semantics: look up first, create on miss, and treat a 422 duplicate as
/// the object already existing, so re-running the migrator never
/// duplicates objects.
#[derive(Debug, Clone)]
pub struct ScalrClient {
    api: ApiClient,
}

impl ScalrClient {
    pub fn new(api: ApiClient) -> Self {
        ScalrClient { api }
    }

    pub fn hostname(&self) -> &str {
        self.api.hostname()
    }

    /// The account behind the token. Zero or multiple accounts is a
    /// configuration problem the operator has to resolve first.
    pub async fn get_account_id(&self) -> Result<String, MigrateError> {
        let listing: Listing<ScalrAccount> = self
            .api
            .get("accounts", &[])
            .await
            .map_err(|e| MigrateError::Fatal(format!("cannot list accounts: {}", e)))?;
        match listing.data.len() {
            0 => Err(MigrateError::Fatal(
                "no account is associated with the given token".to_string(),
            )),
            1 => Ok(listing.data.into_iter().next().map(|a| a.id).unwrap_or_default()),
            _ => Err(MigrateError::Fatal(
                "the token is associated with more than one account".to_string(),
            )),
        }
    }

    pub async fn find_environment(&self, name: &str) -> Result<Option<ScalrEnvironment>, ApiError> {
        let result: Result<Listing<ScalrEnvironment>, ApiError> = self
            .api
            .get("environments", &[("filter[name]", name.to_string())])
            .await;
        match result {
            Ok(listing) => Ok(listing.data.into_iter().next()),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn get_or_create_environment(
        &self,
        name: &str,
        account_id: &str,
    ) -> Result<Ensured<ScalrEnvironment>, ApiError> {
        if let Some(existing) = self.find_environment(name).await? {
            debug!("Environment '{}' already exists", name);
            return Ok(Ensured::Existing(existing));
        }

        let body = json!({
            "data": {
                "type": "environments",
                "attributes": { "name": name },
                "relationships": {
                    "account": {
                        "data": { "id": account_id, "type": "accounts" }
                    }
                }
            }
        });
        let response: Single<ScalrEnvironment> = self.api.post("environments", body).await?;
        info!("Created environment '{}'", name);
        Ok(Ensured::Created(response.data))
    }

    pub async fn find_workspace(
        &self,
        environment_id: &str,
        name: &str,
    ) -> Result<Option<ScalrWorkspace>, ApiError> {
        let result: Result<Listing<ScalrWorkspace>, ApiError> = self
            .api
            .get(
                "workspaces",
                &[
                    ("query", name.to_string()),
                    ("filter[environment]", environment_id.to_string()),
                ],
            )
            .await;
        match result {
            Ok(listing) => Ok(listing
                .data
                .into_iter()
                .find(|ws| ws.attributes.name == name)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn create_workspace(
        &self,
        environment_id: &str,
        spec: &WorkspaceSpec,
        vcs_provider_id: Option<&str>,
        agent_pool_id: Option<&str>,
    ) -> Result<ScalrWorkspace, ApiError> {
        let mut attributes = json!({
            "name": spec.name,
            "auto-apply": spec.auto_apply,
            "operations": spec.operations(),
            "terraform-version": spec.terraform_version,
            "working-directory": spec.working_directory,
            "deletion-protection-enabled": spec.deletion_protection,
            "remote-state-sharing": spec.global_remote_state,
        });

        if let Some(vcs) = &spec.vcs {
            attributes["vcs-repo"] = json!({
                "identifier": vcs.identifier,
                "branch": vcs.branch,
                "dry-runs-enabled": vcs.dry_runs_enabled,
                "ingress-submodules": vcs.ingress_submodules,
            });
            if !vcs.trigger_prefixes.is_empty() {
                attributes["vcs-repo"]["trigger-prefixes"] = json!(vcs.trigger_prefixes);
            }
            if let Some(patterns) = vcs.trigger_patterns_joined() {
                attributes["vcs-repo"]["trigger-patterns"] = json!(patterns);
            }
        }

        let mut relationships = json!({
            "environment": {
                "data": { "type": "environments", "id": environment_id }
            }
        });
        if let Some(vcs_id) = vcs_provider_id {
            relationships["vcs-provider"] =
                json!({ "data": { "type": "vcs-providers", "id": vcs_id } });
        }
        if let Some(pool_id) = agent_pool_id {
            relationships["agent-pool"] =
                json!({ "data": { "type": "agent-pools", "id": pool_id } });
        }

        let body = json!({
            "data": {
                "type": "workspaces",
                "attributes": attributes,
                "relationships": relationships,
            }
        });
        let response: Single<ScalrWorkspace> = self.api.post("workspaces", body).await?;
        info!("Created workspace '{}'", spec.name);
        Ok(response.data)
    }

    /// Create a variable in the given scope; a 422 duplicate means it
    /// already exists and is not an error.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_variable(
        &self,
        key: &str,
        value: &str,
        category: &str,
        sensitive: bool,
        hcl: bool,
        description: Option<&str>,
        relationships: Value,
    ) -> Result<VariableUpsert, ApiError> {
        let body = json!({
            "data": {
                "type": "vars",
                "attributes": {
                    "key": key,
                    "value": value,
                    "category": category,
                    "sensitive": sensitive,
                    "hcl": hcl,
                    "description": description,
                },
                "relationships": relationships,
            }
        });
        let result: Result<Single<ScalrVariable>, ApiError> = self.api.post("vars", body).await;
        match result {
            Ok(response) => Ok(VariableUpsert::Created(response.data)),
            Err(err) if err.is_conflict() => {
                debug!("Variable '{}' already exists", key);
                Ok(VariableUpsert::Existing)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn list_account_variables(
        &self,
        account_id: &str,
        key: &str,
    ) -> Result<Vec<ScalrVariable>, ApiError> {
        let listing: Listing<ScalrVariable> = self
            .api
            .get(
                "vars",
                &[
                    ("filter[account]", account_id.to_string()),
                    ("filter[key]", key.to_string()),
                    ("filter[environment]", "null".to_string()),
                ],
            )
            .await?;
        Ok(listing.data)
    }

    pub async fn link_provider_configuration(
        &self,
        workspace_id: &str,
        pc_id: &str,
    ) -> Result<(), ApiError> {
        let body = json!({
            "data": {
                "type": "provider-configuration-links",
                "relationships": {
                    "provider-configuration": {
                        "data": { "id": pc_id, "type": "provider-configurations" }
                    }
                }
            }
        });
        let result: Result<Value, ApiError> = self
            .api
            .post(
                &format!("workspaces/{}/provider-configuration-links", workspace_id),
                body,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_conflict() => {
                debug!("Provider configuration already linked to {}", workspace_id);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Additive membership post on the relationship, so concurrent units
    /// linking different consumers to the same producer never clobber each
    /// other.
    pub async fn add_remote_state_consumers(
        &self,
        workspace_id: &str,
        consumer_ids: &[String],
    ) -> Result<(), ApiError> {
        let members: Vec<Value> = consumer_ids
            .iter()
            .map(|id| json!({ "type": "workspaces", "id": id }))
            .collect();
        let result: Result<Value, ApiError> = self
            .api
            .post(
                &format!("workspaces/{}/relationships/remote-state-consumers", workspace_id),
                json!({ "data": members }),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) if err.is_conflict() => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub async fn get_current_state_serial(
        &self,
        workspace_id: &str,
    ) -> Result<Option<u64>, ApiError> {
        let result: Result<Single<ScalrStateVersion>, ApiError> = self
            .api
            .get(&format!("workspaces/{}/current-state-version", workspace_id), &[])
            .await;
        match result {
            Ok(response) => Ok(Some(response.data.attributes.serial)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn push_state(
        &self,
        workspace_id: &str,
        serial: u64,
        lineage: Option<&str>,
        md5_hex: &str,
        encoded_state: &str,
    ) -> Result<(), ApiError> {
        let body = json!({
            "data": {
                "type": "state-versions",
                "attributes": {
                    "serial": serial,
                    "lineage": lineage,
                    "md5": md5_hex,
                    "state": encoded_state,
                },
                "relationships": {
                    "workspace": {
                        "data": { "type": "workspaces", "id": workspace_id }
                    }
                }
            }
        });
        let _: Value = self.api.post("state-versions", body).await?;
        Ok(())
    }

    pub async fn find_vcs_provider(&self, name: &str) -> Result<VcsProvider, MigrateError> {
        let listing: Listing<VcsProvider> = self
            .api
            .get("vcs-providers", &[("query", name.to_string())])
            .await?;
        listing
            .data
            .into_iter()
            .next()
            .ok_or_else(|| MigrateError::MissingData(format!("VCS provider '{}' not found", name)))
    }

    /// An agent pool is only usable when at least one agent is connected.
    pub async fn find_agent_pool(&self, name: &str) -> Result<AgentPool, MigrateError> {
        let pools: Listing<AgentPool> = self
            .api
            .get("agent-pools", &[("filter[name]", name.to_string())])
            .await?;
        let pool = pools.data.into_iter().next().ok_or_else(|| {
            MigrateError::MissingData(format!("agent pool '{}' not found", name))
        })?;

        let agents: Listing<Agent> = self
            .api
            .get("agents", &[("filter[agent-pool]", pool.id.clone())])
            .await?;
        if agents.data.is_empty() {
            return Err(MigrateError::MissingData(format!(
                "agent pool '{}' has no active agents",
                name
            )));
        }
        Ok(pool)
    }

    pub async fn find_provider_configuration(
        &self,
        name: &str,
    ) -> Result<ProviderConfiguration, MigrateError> {
        let listing: Listing<ProviderConfiguration> = self
            .api
            .get("provider-configurations", &[("filter[name]", name.to_string())])
            .await?;
        listing.data.into_iter().next().ok_or_else(|| {
            MigrateError::MissingData(format!("provider configuration '{}' not found", name))
        })
    }

    /// Allow a non-shared provider configuration to be used from the given
    /// environment. Idempotent: an environment already on the list is left
    /// alone.
    pub async fn share_provider_configuration(
        &self,
        pc: &ProviderConfiguration,
        environment_id: &str,
    ) -> Result<(), ApiError> {
        if pc.attributes.is_shared {
            return Ok(());
        }

        let mut allowed: Vec<Value> = pc
            .relationships
            .as_ref()
            .and_then(|r| r.get("environments"))
            .and_then(|e| e.get("data"))
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();

        if allowed
            .iter()
            .any(|env| env.get("id").and_then(|id| id.as_str()) == Some(environment_id))
        {
            return Ok(());
        }
        allowed.push(json!({ "id": environment_id, "type": "environments" }));

        let body = json!({
            "data": {
                "type": "provider-configurations",
                "id": pc.id,
                "relationships": {
                    "environments": { "data": allowed }
                }
            }
        });
        let _: Value = self
            .api
            .patch(&format!("provider-configurations/{}", pc.id), body)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensured_reports_creation() {
        let created = Ensured::Created(1);
        let existing = Ensured::Existing(2);
        assert!(created.was_created());
        assert!(!existing.was_created());
        assert_eq!(*existing.value(), 2);
    }

    #[test]
    fn provider_configuration_decodes() {
        let json = r#"{
            "id": "pc-1",
            "attributes": {"name": "aws-prod", "is-shared": false},
            "relationships": {
                "environments": {"data": [{"id": "env-1", "type": "environments"}]}
            }
        }"#;
        let pc: ProviderConfiguration = serde_json::from_str(json).unwrap();
        assert_eq!(pc.attributes.name, "aws-prod");
        assert!(!pc.attributes.is_shared);
    }
}
