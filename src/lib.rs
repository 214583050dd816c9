pub mod cancel;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

pub use cancel::CancellationToken;
pub use error::{EngineError, Result};

pub use logic::{
    strategy_for, CatalogState, DependencyResolver, DeploymentPlanner, DiffEngine, DiffOptions, KindStrategy,
    PlanJob, PlanPipeline, PlannedMigration, ResolverConfig, ScriptGenerator, SyncConflictResolver, SyncPipeline,
    VersionStore,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{FileVersionLog, MemoryVersionLog, VersionLog};
