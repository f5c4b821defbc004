use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::api::tfc::TfcWorkspace;
use crate::report::{RunReport, WarningKind};

/// One workspace migration unit. Owns its workspace and references its
/// state producers by source id; the producers are guaranteed to sit in
/// an earlier wave.
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    pub workspace: TfcWorkspace,
    pub producers: Vec<String>,
}

/// The ordered migration plan: units inside a wave are independent of
/// each other, and every unit's producers live in strictly earlier waves.
#[derive(Debug, Default)]
pub struct MigrationPlan {
    pub waves: Vec<Vec<MigrationUnit>>,
}

impl MigrationPlan {
    pub fn unit_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// Units flattened in execution order; also the order the code
    /// generator emits workspace resources in.
    pub fn units(&self) -> impl Iterator<Item = &MigrationUnit> {
        self.waves.iter().flatten()
    }
}

/// Order workspace creation so that every state producer is migrated
/// before its consumers, using the producer → consumer edges from the
/// source's remote-state sharing relations.
///
/// `consumers` maps a producer workspace id to the ids of its explicit
/// remote-state consumers. Consumers that are not part of the migrated
/// set are dropped with a warning; they are never fabricated on the
/// destination. Cycles do not fail the run: the workspaces involved are
/// migrated in a final wave with their state-sharing links stripped.
pub fn resolve(
    workspaces: Vec<TfcWorkspace>,
    consumers: &HashMap<String, Vec<String>>,
    report: &RunReport,
) -> MigrationPlan {
    let selected: HashSet<String> = workspaces.iter().map(|ws| ws.id.clone()).collect();
    let names: HashMap<String, String> = workspaces
        .iter()
        .map(|ws| (ws.id.clone(), ws.name().to_string()))
        .collect();

    // producer id -> consumer ids, both sides restricted to the migrated set
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    let mut producers_of: HashMap<String, Vec<String>> = HashMap::new();
    for (producer, consumer_ids) in consumers {
        if !selected.contains(producer) {
            continue;
        }
        for consumer in consumer_ids {
            if !selected.contains(consumer) {
                report.warn(
                    WarningKind::DroppedConsumer,
                    names.get(producer).map(String::as_str),
                    format!(
                        "remote-state consumer '{}' is not part of this migration; relation dropped",
                        consumer
                    ),
                );
                continue;
            }
            edges
                .entry(producer.clone())
                .or_default()
                .push(consumer.clone());
            producers_of
                .entry(consumer.clone())
                .or_default()
                .push(producer.clone());
        }
    }

    let mut indegree: HashMap<String, usize> = workspaces
        .iter()
        .map(|ws| {
            let n = producers_of.get(&ws.id).map_or(0, Vec::len);
            (ws.id.clone(), n)
        })
        .collect();

    let mut remaining: Vec<TfcWorkspace> = workspaces;
    let mut waves: Vec<Vec<MigrationUnit>> = Vec::new();

    // Kahn's algorithm in waves; ties resolve by source listing order so
    // re-runs produce identical plans and artifacts.
    while !remaining.is_empty() {
        let (ready, blocked): (Vec<TfcWorkspace>, Vec<TfcWorkspace>) = remaining
            .into_iter()
            .partition(|ws| indegree.get(&ws.id).copied().unwrap_or(0) == 0);

        if ready.is_empty() {
            // Whatever is left forms at least one cycle. Migrate the
            // workspaces anyway, without the state-sharing links.
            for ws in &blocked {
                report.warn(
                    WarningKind::DependencyCycle,
                    Some(ws.name()),
                    "remote-state dependency cycle; workspace migrated without state-sharing links",
                );
            }
            waves.push(
                blocked
                    .into_iter()
                    .map(|workspace| MigrationUnit {
                        workspace,
                        producers: Vec::new(),
                    })
                    .collect(),
            );
            break;
        }

        for ws in &ready {
            if let Some(consumer_ids) = edges.get(&ws.id) {
                for consumer in consumer_ids {
                    if let Some(n) = indegree.get_mut(consumer) {
                        *n = n.saturating_sub(1);
                    }
                }
            }
        }

        waves.push(
            ready
                .into_iter()
                .map(|workspace| {
                    let producers = producers_of
                        .get(&workspace.id)
                        .cloned()
                        .unwrap_or_default();
                    MigrationUnit {
                        workspace,
                        producers,
                    }
                })
                .collect(),
        );
        remaining = blocked;
    }

    debug!(
        "Resolved {} workspaces into {} waves",
        waves.iter().map(Vec::len).sum::<usize>(),
        waves.len()
    );
    MigrationPlan { waves }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws(id: &str, name: &str) -> TfcWorkspace {
        serde_json::from_str(&format!(
            r#"{{"id": "{}", "attributes": {{"name": "{}"}}}}"#,
            id, name
        ))
        .unwrap()
    }

    fn order(plan: &MigrationPlan) -> Vec<String> {
        plan.units().map(|u| u.workspace.name().to_string()).collect()
    }

    #[test]
    fn producer_comes_before_consumer() {
        let report = RunReport::new();
        // B consumes A's state: edge A -> B
        let consumers = HashMap::from([("ws-a".to_string(), vec!["ws-b".to_string()])]);
        let plan = resolve(
            vec![ws("ws-b", "consumer"), ws("ws-a", "producer")],
            &consumers,
            &report,
        );

        let names = order(&plan);
        let producer = names.iter().position(|n| n == "producer").unwrap();
        let consumer = names.iter().position(|n| n == "consumer").unwrap();
        assert!(producer < consumer);

        // The consumer's unit references its producer by id.
        let unit = plan
            .units()
            .find(|u| u.workspace.name() == "consumer")
            .unwrap();
        assert_eq!(unit.producers, vec!["ws-a"]);
        assert!(report.warnings().is_empty());
    }

    #[test]
    fn independents_keep_listing_order() {
        let report = RunReport::new();
        let plan = resolve(
            vec![ws("ws-1", "one"), ws("ws-2", "two"), ws("ws-3", "three")],
            &HashMap::new(),
            &report,
        );
        assert_eq!(plan.waves.len(), 1);
        assert_eq!(order(&plan), vec!["one", "two", "three"]);
    }

    #[test]
    fn chain_produces_one_wave_per_link() {
        let report = RunReport::new();
        let consumers = HashMap::from([
            ("ws-a".to_string(), vec!["ws-b".to_string()]),
            ("ws-b".to_string(), vec!["ws-c".to_string()]),
        ]);
        let plan = resolve(
            vec![ws("ws-c", "c"), ws("ws-b", "b"), ws("ws-a", "a")],
            &consumers,
            &report,
        );
        assert_eq!(plan.waves.len(), 3);
        assert_eq!(order(&plan), vec!["a", "b", "c"]);
    }

    #[test]
    fn three_workspace_cycle_degrades() {
        let report = RunReport::new();
        let consumers = HashMap::from([
            ("ws-a".to_string(), vec!["ws-b".to_string()]),
            ("ws-b".to_string(), vec!["ws-c".to_string()]),
            ("ws-c".to_string(), vec!["ws-a".to_string()]),
        ]);
        let plan = resolve(
            vec![ws("ws-a", "a"), ws("ws-b", "b"), ws("ws-c", "c")],
            &consumers,
            &report,
        );

        // All three still migrate, stripped of their links.
        assert_eq!(plan.unit_count(), 3);
        for unit in plan.units() {
            assert!(unit.producers.is_empty());
        }
        assert_eq!(
            report.warnings_of_kind(WarningKind::DependencyCycle).len(),
            3
        );
    }

    #[test]
    fn cycle_does_not_block_the_rest() {
        let report = RunReport::new();
        let consumers = HashMap::from([
            ("ws-a".to_string(), vec!["ws-b".to_string()]),
            ("ws-b".to_string(), vec!["ws-a".to_string()]),
        ]);
        let plan = resolve(
            vec![ws("ws-a", "a"), ws("ws-b", "b"), ws("ws-x", "independent")],
            &consumers,
            &report,
        );
        assert_eq!(plan.unit_count(), 3);
        assert_eq!(order(&plan)[0], "independent");
    }

    #[test]
    fn consumer_outside_selection_is_dropped_with_warning() {
        let report = RunReport::new();
        let consumers = HashMap::from([(
            "ws-a".to_string(),
            vec!["ws-a-unmigrated".to_string()],
        )]);
        let plan = resolve(vec![ws("ws-a", "a")], &consumers, &report);
        assert_eq!(plan.unit_count(), 1);
        let dropped = report.warnings_of_kind(WarningKind::DroppedConsumer);
        assert_eq!(dropped.len(), 1);
        assert!(dropped[0].message.contains("ws-a-unmigrated"));
    }

    #[test]
    fn diamond_orders_every_producer_first() {
        let report = RunReport::new();
        let consumers = HashMap::from([
            ("ws-root".to_string(), vec!["ws-l".to_string(), "ws-r".to_string()]),
            ("ws-l".to_string(), vec!["ws-leaf".to_string()]),
            ("ws-r".to_string(), vec!["ws-leaf".to_string()]),
        ]);
        let plan = resolve(
            vec![
                ws("ws-leaf", "leaf"),
                ws("ws-l", "left"),
                ws("ws-r", "right"),
                ws("ws-root", "root"),
            ],
            &consumers,
            &report,
        );
        let names = order(&plan);
        assert_eq!(names[0], "root");
        assert_eq!(names.last().map(String::as_str), Some("leaf"));

        let leaf = plan.units().find(|u| u.workspace.name() == "leaf").unwrap();
        let mut producers = leaf.producers.clone();
        producers.sort();
        assert_eq!(producers, vec!["ws-l", "ws-r"]);
    }
}
