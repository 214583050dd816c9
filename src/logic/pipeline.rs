use std::collections::HashMap;
use std::time::Instant;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::task::{self, JoinSet};

use crate::cancel::CancellationToken;
use crate::error::{EngineError, Result};
use crate::logic::diff::{DiffEngine, DiffOptions};
use crate::logic::planner::DeploymentPlanner;
use crate::logic::script::ScriptGenerator;
use crate::model::{DeploymentPlan, ScriptBundle, SchemaGraph};

/// Plan and script for one before/after pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedMigration {
    pub plan: DeploymentPlan,
    pub bundle: ScriptBundle,
    pub elapsed_ms: u64,
}

/// One comparison of a batch, e.g. one tenant database.
#[derive(Debug, Clone)]
pub struct PlanJob {
    pub name: String,
    pub before: SchemaGraph,
    pub after: SchemaGraph,
}

/// Compare → plan → generate, as one call.
#[derive(Debug, Clone, Default)]
pub struct PlanPipeline {
    engine: DiffEngine,
    cancel: CancellationToken,
}

impl PlanPipeline {
    pub fn new(options: DiffOptions) -> Self {
        Self {
            engine: DiffEngine::new(options),
            cancel: CancellationToken::new(),
        }
    }

    /// Share `cancel` with every call made through this pipeline.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn run(&self, before: &SchemaGraph, after: &SchemaGraph) -> Result<PlannedMigration> {
        let start = Instant::now();
        let diff = self.engine.compare_with_cancel(before, after, &self.cancel)?;
        let plan = DeploymentPlanner::plan_with_cancel(before, after, diff, &self.cancel)?;
        let bundle = ScriptGenerator::generate_with_cancel(&plan, &self.cancel)?;
        Ok(PlannedMigration {
            plan,
            bundle,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Run independent jobs on the blocking pool. Results come back in job
    /// name order; one failing job does not affect the others.
    pub async fn run_batch(&self, jobs: Vec<PlanJob>) -> Vec<(String, Result<PlannedMigration>)> {
        let total = jobs.len();
        let mut set = JoinSet::new();
        let mut names = HashMap::with_capacity(total);
        for job in jobs {
            let pipeline = self.clone();
            let name = job.name.clone();
            let handle = set.spawn_blocking(move || pipeline.run(&job.before, &job.after));
            names.insert(handle.id(), name);
        }

        let results = collect_named(set, names).await;
        info!("planned {} migrations", total);
        results
    }
}

/// Drain `set`, naming each result after the job that produced it, including
/// tasks that panicked or were aborted.
async fn collect_named<T: 'static>(
    mut set: JoinSet<Result<T>>,
    mut names: HashMap<task::Id, String>,
) -> Vec<(String, Result<T>)> {
    let mut results = Vec::with_capacity(names.len());
    while let Some(joined) = set.join_next_with_id().await {
        match joined {
            Ok((id, result)) => results.push((names.remove(&id).unwrap_or_default(), result)),
            Err(e) => {
                let name = names.remove(&e.id()).unwrap_or_default();
                warn!("plan task {} failed: {}", name, e);
                results.push((
                    name.clone(),
                    Err(EngineError::Store(anyhow::anyhow!("plan task {} failed: {}", name, e))),
                ));
            }
        }
    }
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Column, ObjectNode};

    fn customers(columns: &[&str]) -> SchemaGraph {
        let node = ObjectNode::table(
            "dbo.customers",
            columns.iter().map(|c| Column::new(c, "int")).collect(),
            vec![],
        );
        SchemaGraph::new(vec![node], vec![]).unwrap()
    }

    #[test]
    fn test_run_produces_plan_and_bundle() {
        let pipeline = PlanPipeline::default();
        let migration = pipeline.run(&customers(&["id"]), &customers(&["id", "email"])).unwrap();
        assert_eq!(migration.plan.order, vec!["dbo.customers".to_string()]);
        assert_eq!(migration.bundle.len(), 1);
    }

    #[test]
    fn test_cancelled_pipeline_returns_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pipeline = PlanPipeline::default().with_cancel(cancel);
        let result = pipeline.run(&customers(&["id"]), &customers(&["id", "email"]));
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn test_batch_returns_results_in_name_order() {
        let pipeline = PlanPipeline::default();
        let jobs = ["tenant-c", "tenant-a", "tenant-b"]
            .iter()
            .map(|name| PlanJob {
                name: name.to_string(),
                before: customers(&["id"]),
                after: customers(&["id", "email"]),
            })
            .collect();

        let results = pipeline.run_batch(jobs).await;
        let names: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["tenant-a", "tenant-b", "tenant-c"]);
        let first = results[0].1.as_ref().unwrap();
        for (_, result) in &results {
            assert_eq!(result.as_ref().unwrap().bundle, first.bundle);
        }
        println!("✓ Batch planned {} tenants", results.len());
    }

    #[tokio::test]
    async fn test_failed_task_keeps_its_job_name() {
        let mut set: JoinSet<Result<u32>> = JoinSet::new();
        let mut names = HashMap::new();
        let ok = set.spawn_blocking(|| Ok(1));
        names.insert(ok.id(), "tenant-ok".to_string());
        let broken = set.spawn_blocking(|| -> Result<u32> { panic!("planner blew up") });
        names.insert(broken.id(), "tenant-broken".to_string());

        let results = collect_named(set, names).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "tenant-broken");
        let err = results[0].1.as_ref().unwrap_err();
        assert!(err.to_string().contains("tenant-broken"), "{}", err);
        assert_eq!(results[1].0, "tenant-ok");
        assert_eq!(*results[1].1.as_ref().unwrap(), 1);
    }
}
