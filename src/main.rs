use anyhow::Context;
use schema_sync_engine::config::EngineConfig;
use schema_sync_engine::logic::PlanPipeline;
use schema_sync_engine::model::SchemaGraph;
use std::path::Path;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    use env_logger::{Builder, Env};
    use log::LevelFilter;

    // RUST_LOG still overrides the default
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_env(Env::default())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (before_path, after_path) = match args.as_slice() {
        [before, after] => (before, after),
        _ => anyhow::bail!("usage: schemasync <before.json> <after.json>"),
    };

    let config = EngineConfig::load()?;
    eprintln!(
        "Rename detection: {} (threshold {:.2})",
        config.diff.detect_renames, config.diff.rename_similarity_threshold
    );

    let before = read_graph(Path::new(before_path)).await?;
    let after = read_graph(Path::new(after_path)).await?;

    let pipeline = PlanPipeline::new(config.diff_options());
    let migration = pipeline.run(&before, &after)?;

    for cycle in &migration.plan.cycles {
        eprintln!(
            "Cycle among {} ({:?})",
            cycle.members.join(", "),
            cycle.break_strategy
        );
    }
    eprintln!(
        "Planned {} units in {} ms",
        migration.bundle.len(),
        migration.elapsed_ms
    );

    println!("{}", serde_json::to_string_pretty(&migration.bundle)?);

    Ok(())
}

async fn read_graph(path: &Path) -> anyhow::Result<SchemaGraph> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let graph = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a valid schema graph", path.display()))?;
    Ok(graph)
}
