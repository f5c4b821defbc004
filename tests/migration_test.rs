//! End-to-end engine tests over in-memory fixtures: selection, dependency
//! resolution, mapping and artifact generation wired together the way the
//! orchestrator drives them.

use std::collections::HashMap;

use scalr_migrate::api::tfc::TfcWorkspace;
use scalr_migrate::config::MigrationConfig;
use scalr_migrate::export::{self, BackendConfig};
use scalr_migrate::hcl::{HclBlock, HclValue, ResourceSet};
use scalr_migrate::mapper::{self, BlockRefs};
use scalr_migrate::pattern::PatternList;
use scalr_migrate::report::{RunReport, WarningKind};
use scalr_migrate::resolver;

fn workspace(id: &str, name: &str) -> TfcWorkspace {
    serde_json::from_str(&format!(
        r#"{{
            "id": "{}",
            "attributes": {{
                "name": "{}",
                "auto-apply": false,
                "operations": true,
                "terraform-version": "1.4.6",
                "vcs-repo": {{"display-identifier": "acme/{}", "branch": "main"}}
            }}
        }}"#,
        id, name, name
    ))
    .unwrap()
}

/// The acme scenario: three workspaces, selection `prod-*`, skip-list
/// `*SECRET*`. Only the two prod workspaces migrate; the generated
/// artifact holds their two resources plus the shared environment,
/// environment first.
#[test]
fn acme_scenario_generates_expected_artifacts() {
    let report = RunReport::new();
    let all = vec![
        workspace("ws-db", "prod-db"),
        workspace("ws-api", "prod-api"),
        workspace("ws-staging", "staging-api"),
    ];

    // Selection
    let selection = PatternList::parse("prod-*");
    let selected: Vec<TfcWorkspace> = all
        .into_iter()
        .filter(|ws| selection.is_match_any(ws.name()))
        .collect();
    assert_eq!(selected.len(), 2);

    // prod-api consumes prod-db's state.
    let consumers = HashMap::from([("ws-db".to_string(), vec!["ws-api".to_string()])]);
    let plan = resolver::resolve(selected, &consumers, &report);

    // Producer strictly before consumer.
    let order: Vec<&str> = plan.units().map(|u| u.workspace.name()).collect();
    assert_eq!(order, vec!["prod-db", "prod-api"]);

    // Variable skip filter drops the secret key in both workspaces.
    let skip = PatternList::parse("*SECRET*");
    for key in ["DB_SECRET_KEY", "API_SECRET_TOKEN"] {
        assert!(skip.is_match_any(key), "{} should be skipped", key);
    }
    assert!(!skip.is_match_any("region"));

    // Build the artifact set the way the orchestrator does: environment
    // first, then workspaces in resolver order.
    let config = MigrationConfig {
        tfc_organization: "acme".into(),
        ..MigrationConfig::default()
    };
    let mut set = ResourceSet::new();
    let mut env = HclBlock::resource("scalr_environment", "acme");
    env.set("name", HclValue::String("acme".into()));
    let env = env.with_id("env-1");
    let refs = BlockRefs {
        environment: Some(env.id_ref()),
        ..BlockRefs::default()
    };
    set.add(env);

    for (index, unit) in plan.units().enumerate() {
        let spec = mapper::map_workspace(&unit.workspace, &config, &report);
        set.add(mapper::workspace_block(
            &spec,
            &refs,
            &format!("ws-scalr-{}", index),
        ));
    }

    let main_tf = export::to_main_tf::render(&set).unwrap();

    // Exactly two workspace resources plus the environment resource.
    assert_eq!(main_tf.matches("resource \"scalr_workspace\"").count(), 2);
    assert_eq!(main_tf.matches("resource \"scalr_environment\"").count(), 1);
    assert!(!main_tf.contains("staging_api"));

    // Ordering: environment defined before both workspaces, producer
    // before consumer.
    let env_pos = main_tf.find("resource \"scalr_environment\" \"acme\"").unwrap();
    let db_pos = main_tf.find("resource \"scalr_workspace\" \"prod_db\"").unwrap();
    let api_pos = main_tf.find("resource \"scalr_workspace\" \"prod_api\"").unwrap();
    assert!(env_pos < db_pos);
    assert!(db_pos < api_pos);

    // Workspace resources reference the environment by address.
    assert!(main_tf.contains("environment_id = scalr_environment.acme.id"));
}

#[test]
fn artifact_generation_is_byte_identical_across_runs() {
    let report = RunReport::new();
    let config = MigrationConfig::default();

    let build = || {
        let mut set = ResourceSet::new();
        let mut env = HclBlock::resource("scalr_environment", "acme");
        env.set("name", HclValue::String("acme".into()));
        let refs = BlockRefs {
            environment: Some(env.id_ref()),
            ..BlockRefs::default()
        };
        set.add(env.with_id("env-1"));
        let spec = mapper::map_workspace(&workspace("ws-1", "prod-db"), &config, &report);
        set.add(mapper::workspace_block(&spec, &refs, "ws-scalr-1"));
        export::to_main_tf::render(&set).unwrap()
    };

    assert_eq!(build(), build());
}

#[test]
fn written_artifacts_cover_backend_and_imports() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("acme");
    let report = RunReport::new();
    let config = MigrationConfig::default();

    let mut set = ResourceSet::new();
    let mut env = HclBlock::resource("scalr_environment", "acme");
    env.set("name", HclValue::String("acme".into()));
    let refs = BlockRefs {
        environment: Some(env.id_ref()),
        ..BlockRefs::default()
    };
    set.add(env.with_id("env-1"));
    let spec = mapper::map_workspace(&workspace("ws-1", "prod-db"), &config, &report);
    set.add(mapper::workspace_block(&spec, &refs, "ws-scalr-1"));

    let backend = BackendConfig {
        hostname: "acme.scalr.io".into(),
        organization: "scalr-admin".into(),
        workspace: "acme".into(),
    };
    export::write_artifacts(&set, &backend, &target).unwrap();

    let imports_tf = std::fs::read_to_string(target.join("imports.tf")).unwrap();
    assert!(imports_tf.contains("to = scalr_environment.acme"));
    assert!(imports_tf.contains("to = scalr_workspace.prod_db"));
    assert!(imports_tf.contains("id = \"ws-scalr-1\""));

    let backend_tf = std::fs::read_to_string(target.join("backend.tf")).unwrap();
    assert!(backend_tf.contains("organization = \"scalr-admin\""));
    assert!(backend_tf.contains("name = \"acme\""));
}

/// Re-running against an unchanged destination finds every object already
/// present: ensure semantics dedup inside the artifact set as well.
#[test]
fn re_adding_ensured_objects_creates_no_duplicates() {
    let mut set = ResourceSet::new();
    for _ in 0..2 {
        set.add(HclBlock::resource("scalr_environment", "acme").with_id("env-1"));
        set.add(HclBlock::resource("scalr_workspace", "prod-db").with_id("ws-1"));
    }
    assert_eq!(set.len(), 2);
    assert_eq!(set.imports().len(), 2);
}

#[test]
fn cycle_degrades_but_all_workspaces_still_migrate() {
    let report = RunReport::new();
    let consumers = HashMap::from([
        ("ws-a".to_string(), vec!["ws-b".to_string()]),
        ("ws-b".to_string(), vec!["ws-c".to_string()]),
        ("ws-c".to_string(), vec!["ws-a".to_string()]),
    ]);
    let plan = resolver::resolve(
        vec![
            workspace("ws-a", "net-a"),
            workspace("ws-b", "net-b"),
            workspace("ws-c", "net-c"),
        ],
        &consumers,
        &report,
    );

    assert_eq!(plan.unit_count(), 3);
    assert!(plan.units().all(|u| u.producers.is_empty()));
    assert_eq!(
        report.warnings_of_kind(WarningKind::DependencyCycle).len(),
        3
    );
}
